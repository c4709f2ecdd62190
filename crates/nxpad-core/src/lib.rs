#![no_std]

pub mod debounce;
pub mod hid;
pub mod keyboard;
pub mod layout;
pub mod macros;
