#![no_std]

// Everything here touches the HAL, so the whole crate body sits
// behind the chip feature; without it this is an empty library and
// host builds of the workspace stay green.
#[cfg(feature = "stm32f411")]
pub mod clock;
#[cfg(feature = "stm32f411")]
pub mod direct_pins;
