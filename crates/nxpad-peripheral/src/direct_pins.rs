use nxpad_common::{
    KeyState,
    scan::{KeyScan, PinRead, Polarity},
};
use stm32f4xx_hal::gpio::{Input, Pin};
use stm32f4xx_hal::hal::digital::InputPin;

/// Reader for switches wired straight to GPIO inputs, one pin per
/// key, the way a pad too small for a matrix is built. The pins are
/// expected to be configured with the pull that matches `polarity`
/// (pull-up for active low).
pub struct DirectPins<T> {
    pins: T,
    polarity: Polarity,
}

impl<T> DirectPins<T> {
    pub const fn new(pins: T, polarity: Polarity) -> Self {
        Self { pins, polarity }
    }
}

// Implements [`KeyScan`] for tuples of input pins of any port/pin
// combination. A read failure maps to [`PinRead::Unknown`] for that
// key alone; the remaining pins are still read.
macro_rules! direct_pins_impl {
    ($($nkeys:literal),*) => {
        $(
            seq_macro::seq!(I in 0..$nkeys {
                impl<#(const P~I: char, const N~I: u8,)*> KeyScan<$nkeys>
                    for DirectPins<(#(Pin<P~I, N~I, Input>,)*)>
                {
                    fn read_keys(&mut self) -> [PinRead; $nkeys] {
                        let pressed_low = matches!(self.polarity, Polarity::ActiveLow);
                        // The trait method is named explicitly: the
                        // pins also carry an infallible inherent
                        // is_low, and the fallible read is the one
                        // that lets a bad pin degrade to Unknown.
                        [#(
                            match InputPin::is_low(&mut self.pins.I) {
                                Ok(low) => PinRead::Level(KeyState::from_bool(low == pressed_low)),
                                Err(_) => PinRead::Unknown,
                            },
                        )*]
                    }
                }
            });
        )*
    };
}

direct_pins_impl!(2, 3, 4, 5, 6, 7, 8);
