use core::fmt::Display;

use nxpad_common::dev_warn;
use usbd_hid::descriptor::{KeyboardUsage, MediaKey};

use crate::hid::Modifiers;
use crate::macros::MacroStep;

/// What a key does once its position has been resolved through the
/// active layers. A closed set, matched exhaustively at dispatch
/// time.
#[derive(Clone, Copy)]
pub enum Action {
    /// Assert a single keyboard usage while held.
    Key(KeyboardUsage),
    /// Assert a modifier combination plus a keyboard usage while
    /// held, e.g. Ctrl+Alt+1.
    Chord(Modifiers, KeyboardUsage),
    /// Assert a consumer-control usage while held.
    Media(MediaKey),
    /// Keep a layer active for as long as the key is held.
    LayerHold(u8),
    /// Flip a layer's persistent activation on every press.
    LayerToggle(u8),
    /// Run a macro sequence. Fire and forget; the release of the key
    /// has no effect on the execution.
    Macro(&'static [MacroStep]),
    /// Defer to the mapping of the next lower active layer.
    Transparent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutError {
    /// The base layer must resolve every key; Transparent there has
    /// nothing left to fall through to.
    TransparentBaseKey { key: usize },
    /// A LayerHold/LayerToggle references a layer the keymap does not
    /// have.
    LayerOutOfRange { layer: usize, key: usize },
}

impl Display for LayoutError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LayoutError::TransparentBaseKey { key } => {
                write!(f, "Transparent action in the base layer at key {}", key)
            }
            LayoutError::LayerOutOfRange { layer, key } => {
                write!(
                    f,
                    "Reference to a missing layer from layer {}, key {}",
                    layer, key
                )
            }
        }
    }
}

/// The keymap plus the runtime layer state. Layer 0 is the base and
/// is always active; higher layers join the active set momentarily
/// through holds or persistently through toggles, and win over lower
/// ones when resolving.
pub struct Layout<const KEYS: usize, const LAYERS: usize> {
    layers: [[Action; KEYS]; LAYERS],
    hold_mask: u8,
    toggle_mask: u8,
}

impl<const KEYS: usize, const LAYERS: usize> Layout<KEYS, LAYERS> {
    /// Builds a layout, validating the keymap's structural
    /// invariants. Callable in const context, so a board crate can
    /// turn a malformed keymap into a build failure.
    pub const fn new(layers: [[Action; KEYS]; LAYERS]) -> Result<Self, LayoutError> {
        assert!(LAYERS >= 1, "There must be at least the base layer");
        assert!(LAYERS <= 8, "The layer masks hold at most 8 layers");

        let mut key = 0;
        while key < KEYS {
            if let Action::Transparent = layers[0][key] {
                return Err(LayoutError::TransparentBaseKey { key });
            }
            key += 1;
        }

        let mut layer = 0;
        while layer < LAYERS {
            let mut key = 0;
            while key < KEYS {
                match layers[layer][key] {
                    Action::LayerHold(target) | Action::LayerToggle(target) => {
                        if target as usize >= LAYERS {
                            return Err(LayoutError::LayerOutOfRange { layer, key });
                        }
                    }
                    _ => {}
                }
                key += 1;
            }
            layer += 1;
        }

        Ok(Self {
            layers,
            hold_mask: 0,
            toggle_mask: 0,
        })
    }

    pub fn is_active(&self, layer: usize) -> bool {
        layer == 0 || ((self.hold_mask | self.toggle_mask) >> layer) & 1 != 0
    }

    /// The active layers, highest priority first. Never empty: layer
    /// 0 closes the sequence.
    pub fn active_layers(&self) -> impl Iterator<Item = usize> + '_ {
        (0..LAYERS).rev().filter(move |layer| self.is_active(*layer))
    }

    /// Resolves a physical key against the active layers, walking
    /// from the highest one down and skipping Transparent entries.
    /// Pure for a fixed active set; never returns Transparent, since
    /// the base layer is validated not to contain it.
    pub fn resolve(&self, key: usize) -> Action {
        for layer in (1..LAYERS).rev() {
            if self.is_active(layer) {
                match self.layers[layer][key] {
                    Action::Transparent => {}
                    action => return action,
                }
            }
        }
        self.layers[0][key]
    }

    /// Activates or deactivates a momentary hold of `layer`. Driven
    /// by the press and release edges of a [`Action::LayerHold`] key.
    pub fn set_hold(&mut self, layer: u8, active: bool) {
        let Some(bit) = Self::layer_bit(layer) else {
            return;
        };
        if active {
            self.hold_mask |= bit;
        } else {
            self.hold_mask &= !bit;
        }
    }

    /// Flips the persistent activation of `layer`. Driven by the
    /// press edge of a [`Action::LayerToggle`] key only; releases do
    /// nothing.
    pub fn toggle(&mut self, layer: u8) {
        let Some(bit) = Self::layer_bit(layer) else {
            return;
        };
        self.toggle_mask ^= bit;
    }

    fn layer_bit(layer: u8) -> Option<u8> {
        if (layer as usize) < LAYERS {
            Some(1 << layer)
        } else {
            // Unreachable with a validated keymap.
            dev_warn!("Layer {} out of range", layer);
            None
        }
    }
}
