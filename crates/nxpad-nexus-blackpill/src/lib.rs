#![no_std]

pub mod keymap;

#[cfg(feature = "stm32f411")]
pub mod config;
