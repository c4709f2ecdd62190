use nxpad_common::{KeyState, dev_trace, time::Instant};

/// Represents a type that filters the raw levels of the key inputs
/// into stable press/release edges, absorbing the electrical noise of
/// the mechanical switches.
pub trait Debounce<const KEYS: usize> {
    /// Feeds one raw reading for `key`. Returns the new stable state
    /// when this reading completes an edge, [`None`] otherwise.
    fn update(&mut self, key: usize, raw: KeyState, now: Instant) -> Option<KeyState>;
}

#[derive(Clone, Copy, Default)]
struct ButtonState {
    stable: KeyState,
    last_raw: KeyState,
    last_raw_change: Instant,
}

// Following a similar naming than QMK
/// Debounce strategy in which a level change only becomes an edge
/// once the wire has held the new level for `DEBOUNCE_MILLIS`
/// milliseconds. Flickers shorter than the window restart it and
/// never surface, and a single sustained change produces exactly one
/// edge.
pub struct DeferPerKeyDebouncer<const KEYS: usize, const DEBOUNCE_MILLIS: u32> {
    keys: [ButtonState; KEYS],
}

impl<const KEYS: usize, const DEBOUNCE_MILLIS: u32> DeferPerKeyDebouncer<KEYS, DEBOUNCE_MILLIS> {
    pub const fn new() -> Self {
        const {
            assert!(DEBOUNCE_MILLIS > 0, "Debounce window cannot be empty");
        }

        Self {
            keys: [ButtonState {
                stable: KeyState::Released,
                last_raw: KeyState::Released,
                last_raw_change: Instant::from_millis(0),
            }; KEYS],
        }
    }
}

impl<const KEYS: usize, const DEBOUNCE_MILLIS: u32> Debounce<KEYS>
    for DeferPerKeyDebouncer<KEYS, DEBOUNCE_MILLIS>
{
    fn update(&mut self, key: usize, raw: KeyState, now: Instant) -> Option<KeyState> {
        let state = &mut self.keys[key];
        if raw != state.last_raw {
            state.last_raw = raw;
            state.last_raw_change = now;
        }

        if raw != state.stable && now.millis_since(state.last_raw_change) >= DEBOUNCE_MILLIS {
            state.stable = raw;
            dev_trace!("Key {} settled {:?} after {} ms", key, raw, DEBOUNCE_MILLIS);
            return Some(raw);
        }

        None
    }
}

/// A debounce strategy where no debounce is done. Raw level changes
/// are reported as edges as they come from the wire.
pub struct NoDebouncer<const KEYS: usize> {
    stable: [KeyState; KEYS],
}

impl<const KEYS: usize> NoDebouncer<KEYS> {
    pub const fn new() -> Self {
        Self {
            stable: [KeyState::Released; KEYS],
        }
    }
}

impl<const KEYS: usize> Debounce<KEYS> for NoDebouncer<KEYS> {
    fn update(&mut self, key: usize, raw: KeyState, _now: Instant) -> Option<KeyState> {
        if raw != self.stable[key] {
            self.stable[key] = raw;
            Some(raw)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: u32) -> Instant {
        Instant::from_millis(millis)
    }

    #[test]
    fn sustained_level_emits_exactly_one_edge() {
        let mut deb: DeferPerKeyDebouncer<1, 5> = DeferPerKeyDebouncer::new();
        assert_eq!(deb.update(0, KeyState::Pressed, at(10)), None);
        assert_eq!(deb.update(0, KeyState::Pressed, at(12)), None);
        assert_eq!(
            deb.update(0, KeyState::Pressed, at(15)),
            Some(KeyState::Pressed)
        );
        assert_eq!(deb.update(0, KeyState::Pressed, at(16)), None);
        assert_eq!(deb.update(0, KeyState::Pressed, at(300)), None);
    }

    #[test]
    fn flicker_within_window_is_absorbed() {
        let mut deb: DeferPerKeyDebouncer<1, 5> = DeferPerKeyDebouncer::new();
        assert_eq!(deb.update(0, KeyState::Pressed, at(0)), None);
        assert_eq!(deb.update(0, KeyState::Released, at(2)), None);
        assert_eq!(deb.update(0, KeyState::Pressed, at(3)), None);
        assert_eq!(deb.update(0, KeyState::Released, at(4)), None);
        // Long after the burst the stable state is still Released and
        // nothing ever fired.
        assert_eq!(deb.update(0, KeyState::Released, at(50)), None);
    }

    #[test]
    fn flicker_restarts_the_window() {
        let mut deb: DeferPerKeyDebouncer<1, 5> = DeferPerKeyDebouncer::new();
        assert_eq!(deb.update(0, KeyState::Pressed, at(0)), None);
        assert_eq!(deb.update(0, KeyState::Released, at(3)), None);
        assert_eq!(deb.update(0, KeyState::Pressed, at(4)), None);
        // 5 ms from the first press, but only 4 from the re-press.
        assert_eq!(deb.update(0, KeyState::Pressed, at(5)), None);
        assert_eq!(
            deb.update(0, KeyState::Pressed, at(9)),
            Some(KeyState::Pressed)
        );
    }

    #[test]
    fn edges_always_alternate_polarity() {
        let mut deb: DeferPerKeyDebouncer<1, 5> = DeferPerKeyDebouncer::new();
        assert_eq!(deb.update(0, KeyState::Pressed, at(0)), None);
        assert_eq!(
            deb.update(0, KeyState::Pressed, at(5)),
            Some(KeyState::Pressed)
        );
        assert_eq!(deb.update(0, KeyState::Released, at(10)), None);
        assert_eq!(
            deb.update(0, KeyState::Released, at(15)),
            Some(KeyState::Released)
        );
        assert_eq!(deb.update(0, KeyState::Released, at(20)), None);
    }

    #[test]
    fn keys_are_debounced_independently() {
        let mut deb: DeferPerKeyDebouncer<2, 5> = DeferPerKeyDebouncer::new();
        assert_eq!(deb.update(0, KeyState::Pressed, at(0)), None);
        assert_eq!(deb.update(1, KeyState::Pressed, at(3)), None);
        assert_eq!(
            deb.update(0, KeyState::Pressed, at(5)),
            Some(KeyState::Pressed)
        );
        assert_eq!(deb.update(1, KeyState::Pressed, at(5)), None);
        assert_eq!(
            deb.update(1, KeyState::Pressed, at(8)),
            Some(KeyState::Pressed)
        );
    }

    #[test]
    fn no_debouncer_passes_changes_through() {
        let mut deb: NoDebouncer<1> = NoDebouncer::new();
        assert_eq!(
            deb.update(0, KeyState::Pressed, at(0)),
            Some(KeyState::Pressed)
        );
        assert_eq!(deb.update(0, KeyState::Pressed, at(0)), None);
        assert_eq!(
            deb.update(0, KeyState::Released, at(0)),
            Some(KeyState::Released)
        );
    }
}
