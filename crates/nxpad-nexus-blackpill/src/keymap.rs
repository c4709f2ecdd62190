//! The Nexus Pad layout: six keys, two layers. Layer 0 carries the
//! daily drivers (Ctrl+Alt+digit launcher hotkeys the host side binds
//! to applications, plus mute and the FN hold); layer 1 carries
//! volume, the snipping-tool macro and track controls.

use nxpad_core::hid::Modifiers;
use nxpad_core::layout::{Action, Layout};
use nxpad_core::macros::MacroStep;
use nxpad_core::macros::MacroStep::{Press, Release, Tap};
use usbd_hid::descriptor::{KeyboardUsage, MediaKey};

pub const KEY_COUNT: usize = 6;
pub const LAYER_COUNT: usize = 2;

pub type NexusLayout = Layout<KEY_COUNT, LAYER_COUNT>;

const LAUNCHER_MODS: Modifiers = Modifiers::LEFT_CTRL.union(Modifiers::LEFT_ALT);

/// Gui+Shift+S, the Windows snipping shortcut.
pub const SNIP_TOOL: [MacroStep; 5] = [
    Press(KeyboardUsage::KeyboardLeftGUI),
    Press(KeyboardUsage::KeyboardLeftShift),
    Tap(KeyboardUsage::KeyboardSs),
    Release(KeyboardUsage::KeyboardLeftShift),
    Release(KeyboardUsage::KeyboardLeftGUI),
];

// Validated at compile time; a malformed keymap fails the build
// instead of reaching the device.
pub const LAYOUT: NexusLayout = match NexusLayout::new([
    [
        Action::Chord(LAUNCHER_MODS, KeyboardUsage::Keyboard1Exclamation), // Discord + Medal
        Action::Chord(LAUNCHER_MODS, KeyboardUsage::Keyboard2At),          // Nexus AI
        Action::Chord(LAUNCHER_MODS, KeyboardUsage::Keyboard3Hash),        // Steam
        Action::Chord(LAUNCHER_MODS, KeyboardUsage::Keyboard4Dollar),      // VSCode
        Action::Media(MediaKey::Mute),
        Action::LayerHold(1), // FN
    ],
    [
        Action::Media(MediaKey::VolumeDecrement),
        Action::Media(MediaKey::VolumeIncrement),
        Action::Macro(&SNIP_TOOL),
        Action::Transparent,
        Action::Media(MediaKey::NextTrack),
        Action::Media(MediaKey::PrevTrack),
    ],
]) {
    Ok(layout) => layout,
    Err(_) => panic!("Nexus pad keymap failed validation"),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_layer_falls_back_to_the_launcher_on_the_transparent_key() {
        let mut layout = LAYOUT;
        layout.set_hold(1, true);
        assert!(matches!(
            layout.resolve(3),
            Action::Chord(mods, KeyboardUsage::Keyboard4Dollar) if mods == LAUNCHER_MODS
        ));
    }

    #[test]
    fn fn_key_holds_the_utility_layer() {
        let mut layout = LAYOUT;
        assert!(matches!(layout.resolve(5), Action::LayerHold(1)));
        layout.set_hold(1, true);
        assert!(matches!(layout.resolve(2), Action::Macro(_)));
        layout.set_hold(1, false);
        assert!(matches!(layout.resolve(2), Action::Chord(..)));
    }
}
