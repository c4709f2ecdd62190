use nxpad_core::debounce::DeferPerKeyDebouncer;
use nxpad_core::hid::UsbHidBus;
use nxpad_core::keyboard::Keyboard;
use nxpad_peripheral::clock::DwtClock;
use nxpad_peripheral::direct_pins::DirectPins;
use stm32f4xx_hal::gpio::{Input, Pin};
use stm32f4xx_hal::otg_fs::USB;
use synopsys_usb_otg::UsbBus;

use crate::keymap::{KEY_COUNT, LAYER_COUNT};

pub const DEBOUNCE_MILLIS: u32 = 5;
pub const TAP_HOLD_MILLIS: u32 = 8;
/// Macro executions that may run at once. One per macro-bearing key
/// would do; a little headroom costs nothing.
pub const MACRO_SLOTS: usize = 4;

// The switches sit on the first six port A pins, wired to ground
// (pull-up inputs, active low).
pub type KeyPins = (
    Pin<'A', 0, Input>,
    Pin<'A', 1, Input>,
    Pin<'A', 2, Input>,
    Pin<'A', 3, Input>,
    Pin<'A', 4, Input>,
    Pin<'A', 5, Input>,
);

// TODO SK6812 underglow on PB0, once a driver for it is in place.

pub type TScan = DirectPins<KeyPins>;
pub type TDebounce = DeferPerKeyDebouncer<KEY_COUNT, DEBOUNCE_MILLIS>;
pub type TKeyboard<'usb> = Keyboard<
    KEY_COUNT,
    LAYER_COUNT,
    MACRO_SLOTS,
    TAP_HOLD_MILLIS,
    TScan,
    TDebounce,
    UsbHidBus<'usb, UsbBus<USB>>,
    DwtClock,
>;
