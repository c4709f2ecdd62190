use crate::KeyState;

/// Electrical convention of the key inputs. The pad wires its switches
/// to ground with pull-ups, so a low level means pressed by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    ActiveLow,
    ActiveHigh,
}

/// Outcome of reading a single key input during a scan. A pin whose
/// read failed is reported as [`Unknown`] without disturbing the rest
/// of the frame.
///
/// [`Unknown`]: PinRead::Unknown
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinRead {
    Level(KeyState),
    Unknown,
}

/// Represents a type that reads the raw state of every key input once
/// per tick. No debouncing or interpretation happens here; the levels
/// come back exactly as the wire shows them.
pub trait KeyScan<const KEYS: usize> {
    fn read_keys(&mut self) -> [PinRead; KEYS];
}
