use nxpad_common::{
    KeyState, dev_info, dev_warn,
    scan::{KeyScan, PinRead},
    time::Clock,
};

use crate::debounce::Debounce;
use crate::hid::{HidBus, HidReportState};
use crate::layout::{Action, Layout};
use crate::macros::MacroEngine;

/// The pad's event loop. Owns every component directly and drives one
/// scan → debounce → resolve/dispatch → emit cycle per [`poll`] call;
/// all the edges of a tick are dispatched before that tick's flush,
/// so the host never sees a half-applied tick.
///
/// [`poll`]: Keyboard::poll
pub struct Keyboard<
    const KEYS: usize,
    const LAYERS: usize,
    const MACROS: usize,
    const TAP_HOLD_MILLIS: u32,
    Scan,
    Deb,
    Bus,
    Clk,
> where
    Scan: KeyScan<KEYS>,
    Deb: Debounce<KEYS>,
    Bus: HidBus,
    Clk: Clock,
{
    scan: Scan,
    debouncer: Deb,
    layout: Layout<KEYS, LAYERS>,
    macros: MacroEngine<MACROS, TAP_HOLD_MILLIS>,
    report: HidReportState,
    pub hid_bus: Bus,
    clock: Clk,
    /// Action resolved when each key went down, replayed at release.
    pressed: [Option<Action>; KEYS],
}

impl<
    const KEYS: usize,
    const LAYERS: usize,
    const MACROS: usize,
    const TAP_HOLD_MILLIS: u32,
    Scan,
    Deb,
    Bus,
    Clk,
> Keyboard<KEYS, LAYERS, MACROS, TAP_HOLD_MILLIS, Scan, Deb, Bus, Clk>
where
    Scan: KeyScan<KEYS>,
    Deb: Debounce<KEYS>,
    Bus: HidBus,
    Clk: Clock,
{
    pub fn new(
        scan: Scan,
        debouncer: Deb,
        layout: Layout<KEYS, LAYERS>,
        hid_bus: Bus,
        clock: Clk,
    ) -> Self {
        Self {
            scan,
            debouncer,
            layout,
            macros: MacroEngine::new(),
            report: HidReportState::new(),
            hid_bus,
            clock,
            pressed: [None; KEYS],
        }
    }

    /// One tick of the firmware loop.
    pub fn poll(&mut self) {
        let now = self.clock.now();

        let frame = self.scan.read_keys();
        for (key, read) in frame.iter().enumerate() {
            let PinRead::Level(raw) = *read else {
                // Failed read: no change for this key this tick, the
                // rest of the frame still counts.
                continue;
            };
            if let Some(edge) = self.debouncer.update(key, raw, now) {
                self.dispatch(key, edge);
            }
        }

        self.macros.tick(now, &mut self.report);
        self.report.flush(&mut self.hid_bus);
        self.hid_bus.poll();
    }

    fn dispatch(&mut self, key: usize, edge: KeyState) {
        dev_info!("{:?} key {}", edge, key);
        match edge {
            KeyState::Pressed => {
                let action = self.layout.resolve(key);
                self.pressed[key] = Some(action);
                self.apply_press(key, action);
            }
            KeyState::Released => {
                // Replay the action resolved at press time; the
                // active layer set may have changed since.
                if let Some(action) = self.pressed[key].take() {
                    self.apply_release(action);
                }
            }
        }
    }

    fn apply_press(&mut self, key: usize, action: Action) {
        match action {
            Action::Key(code) => {
                if self.report.set(code, true).is_err() {
                    dev_warn!("Keymap asserts unsupported usage {:#04x}", code as u8);
                }
            }
            Action::Chord(modifiers, code) => {
                self.report.set_modifiers(modifiers, true);
                if self.report.set(code, true).is_err() {
                    dev_warn!("Keymap asserts unsupported usage {:#04x}", code as u8);
                }
            }
            Action::Media(code) => self.report.set_media(code, true),
            Action::LayerHold(layer) => self.layout.set_hold(layer, true),
            Action::LayerToggle(layer) => self.layout.toggle(layer),
            Action::Macro(seq) => self.macros.trigger(seq, key),
            // Resolution never yields Transparent on a validated
            // keymap.
            Action::Transparent => {}
        }
    }

    fn apply_release(&mut self, action: Action) {
        match action {
            Action::Key(code) => {
                let _ = self.report.set(code, false);
            }
            Action::Chord(modifiers, code) => {
                let _ = self.report.set(code, false);
                self.report.set_modifiers(modifiers, false);
            }
            Action::Media(code) => self.report.set_media(code, false),
            Action::LayerHold(layer) => self.layout.set_hold(layer, false),
            // Toggles flip on press edges only.
            Action::LayerToggle(_) => {}
            // Macros run to completion on their own.
            Action::Macro(_) => {}
            Action::Transparent => {}
        }
    }
}
