use core::fmt::Display;

use bitflags::bitflags;
use heapless::Vec;
use nxpad_common::{dev_debug, dev_error, dev_warn};
use usb_device::bus::{UsbBus, UsbBusAllocator};
use usb_device::device::{StringDescriptors, UsbDevice, UsbDeviceBuilder, UsbRev, UsbVidPid};
use usbd_hid::UsbError;
use usbd_hid::descriptor::{
    AsInputReport, KeyboardReport, KeyboardUsage, MediaKey, MediaKeyboardReport,
    SerializedDescriptor,
};
use usbd_hid::hid_class::{
    HIDClass, HidClassSettings, HidCountryCode, HidProtocol, HidSubClass, ProtocolModeConfig,
};

/// Number of simultaneous non-modifier keys a boot protocol keyboard
/// report can carry.
pub const REPORT_KEY_SLOTS: usize = 6;

const MODIFIER_USAGE_MIN: u8 = 0xe0;
const MODIFIER_USAGE_MAX: u8 = 0xe7;

bitflags! {
    /// The modifier byte of the boot keyboard report. One bit per
    /// usage in `0xE0..=0xE7`, in HID usage order.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const LEFT_CTRL = 1 << 0;
        const LEFT_SHIFT = 1 << 1;
        const LEFT_ALT = 1 << 2;
        const LEFT_GUI = 1 << 3;
        const RIGHT_CTRL = 1 << 4;
        const RIGHT_SHIFT = 1 << 5;
        const RIGHT_ALT = 1 << 6;
        const RIGHT_GUI = 1 << 7;
    }
}

impl Modifiers {
    /// Maps a keyboard page usage to its modifier bit, if it is one.
    pub const fn from_usage(code: u8) -> Option<Modifiers> {
        if code >= MODIFIER_USAGE_MIN && code <= MODIFIER_USAGE_MAX {
            Modifiers::from_bits(1 << (code - MODIFIER_USAGE_MIN))
        } else {
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum KeyChangeError {
    /// The usage cannot be carried in a keyboard report: the null
    /// usage or one of the error roll-over codes.
    Unsupported,
}

#[derive(Debug)]
pub enum HidPushError {
    UsbError(UsbError),
}

impl From<UsbError> for HidPushError {
    fn from(value: UsbError) -> Self {
        Self::UsbError(value)
    }
}

impl Display for HidPushError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HidPushError::UsbError(usb_error) => {
                write!(f, "Usb error: {:?}", usb_error)
            }
        }
    }
}

/// A type that is capable of handing finished reports to the USB
/// host. Which endpoints or device classes it uses under the hood is
/// implementation-specific; the fakes in the tests record them
/// instead.
pub trait HidBus {
    fn push_keyboard(&mut self, report: KeyboardReport) -> Result<(), HidPushError>;
    fn push_consumer(&mut self, report: MediaKeyboardReport) -> Result<(), HidPushError>;

    /// Runs the transport housekeeping for this tick: retries parked
    /// reports, services the device state machine. Returns true if
    /// host traffic was handled.
    fn poll(&mut self) -> bool;
}

/// The pending HID state of the pad: the modifier byte, up to
/// [`REPORT_KEY_SLOTS`] asserted keys in assertion order, and the
/// single consumer-control usage. [`flush`] transmits a stream only
/// when it differs from what the host last saw.
///
/// [`flush`]: HidReportState::flush
pub struct HidReportState {
    modifiers: Modifiers,
    keys: Vec<u8, REPORT_KEY_SLOTS>,
    media: u16,
    sent_modifiers: Modifiers,
    sent_keys: [u8; REPORT_KEY_SLOTS],
    sent_media: u16,
}

impl HidReportState {
    pub const fn new() -> Self {
        Self {
            modifiers: Modifiers::empty(),
            keys: Vec::new(),
            media: 0,
            sent_modifiers: Modifiers::empty(),
            sent_keys: [0; REPORT_KEY_SLOTS],
            sent_media: 0,
        }
    }

    /// Asserts or deasserts a keyboard page usage. Modifier usages
    /// are routed into the modifier byte; everything else occupies a
    /// key slot. When all slots are taken the earliest-asserted key
    /// is evicted to make room, so overflow always drops the oldest
    /// key and never a random one.
    pub fn set(&mut self, key: KeyboardUsage, asserted: bool) -> Result<(), KeyChangeError> {
        self.set_code(key as u8, asserted)
    }

    /// Same as [`set`], for a raw usage code.
    ///
    /// [`set`]: HidReportState::set
    pub fn set_code(&mut self, code: u8, asserted: bool) -> Result<(), KeyChangeError> {
        if code == 0 || (0x01..=0x03).contains(&code) {
            return Err(KeyChangeError::Unsupported);
        }

        if let Some(modifier) = Modifiers::from_usage(code) {
            self.set_modifiers(modifier, asserted);
            return Ok(());
        }

        if asserted {
            if self.keys.contains(&code) {
                return Ok(());
            }
            if self.keys.is_full() {
                let evicted = self.keys.remove(0);
                dev_warn!("Report slots full, evicting oldest usage {:#04x}", evicted);
            }
            // A slot is guaranteed free at this point.
            let _ = self.keys.push(code);
        } else if let Some(pos) = self.keys.iter().position(|held| *held == code) {
            self.keys.remove(pos);
        }
        Ok(())
    }

    pub fn set_modifiers(&mut self, modifiers: Modifiers, asserted: bool) {
        if asserted {
            self.modifiers.insert(modifiers);
        } else {
            self.modifiers.remove(modifiers);
        }
    }

    /// Asserts or deasserts the consumer-control usage. The stream
    /// carries a single code, so a later press supersedes an earlier
    /// one and releasing a superseded key is a no-op.
    pub fn set_media(&mut self, key: MediaKey, asserted: bool) {
        let code = key as u16;
        if asserted {
            self.media = code;
        } else if self.media == code {
            self.media = 0;
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// The pending key slots, padded with the null usage.
    pub fn keycodes(&self) -> [u8; REPORT_KEY_SLOTS] {
        let mut codes = [0u8; REPORT_KEY_SLOTS];
        codes[..self.keys.len()].copy_from_slice(&self.keys);
        codes
    }

    pub fn media(&self) -> u16 {
        self.media
    }

    /// Transmits whichever of the two report streams changed since
    /// the last successful flush. A failed push leaves the sent state
    /// untouched, so the report is retried on the next tick.
    pub fn flush<B: HidBus>(&mut self, bus: &mut B) {
        let keycodes = self.keycodes();
        if self.modifiers != self.sent_modifiers || keycodes != self.sent_keys {
            let report = KeyboardReport {
                modifier: self.modifiers.bits(),
                reserved: 0,
                leds: 0,
                keycodes,
            };
            match bus.push_keyboard(report) {
                Ok(()) => {
                    self.sent_modifiers = self.modifiers;
                    self.sent_keys = keycodes;
                }
                Err(e) => dev_error!("Keyboard report push failed: {}", e),
            }
        }

        if self.media != self.sent_media {
            match bus.push_consumer(MediaKeyboardReport {
                usage_id: self.media,
            }) {
                Ok(()) => self.sent_media = self.media,
                Err(e) => dev_error!("Consumer report push failed: {}", e),
            }
        }
    }
}

pub struct UsbHidSettings<'s, 'b> {
    pub vid_pid: UsbVidPid,
    pub string_descriptors: &'s [StringDescriptors<'b>],
    pub poll_ms: u8,
}

/// [`HidBus`] over a USB device with two IN endpoints: the boot
/// keyboard report and the consumer-control report. Reports that hit
/// a busy endpoint are parked and resent from [`poll`]; a newer
/// report for the same stream supersedes a parked one.
///
/// [`poll`]: UsbHidBus::poll
pub struct UsbHidBus<'usb, B: UsbBus> {
    usb_dev: UsbDevice<'usb, B>,
    keyboard_ep: HIDClass<'usb, B>,
    consumer_ep: HIDClass<'usb, B>,
    parked_keyboard: Option<KeyboardReport>,
    parked_consumer: Option<MediaKeyboardReport>,
}

impl<'usb, B: UsbBus> UsbHidBus<'usb, B> {
    pub fn alloc<'s>(
        allocator: &'usb UsbBusAllocator<B>,
        settings: &'s UsbHidSettings<'s, 'usb>,
    ) -> Self {
        let keyboard_ep = HIDClass::new_ep_in_with_settings(
            allocator,
            KeyboardReport::desc(),
            settings.poll_ms,
            HidClassSettings {
                subclass: HidSubClass::NoSubClass,
                protocol: HidProtocol::Keyboard,
                config: ProtocolModeConfig::DefaultBehavior,
                locale: HidCountryCode::NotSupported,
            },
        );
        let consumer_ep =
            HIDClass::new_ep_in(allocator, MediaKeyboardReport::desc(), settings.poll_ms);

        let usb_dev = UsbDeviceBuilder::new(allocator, UsbVidPid(settings.vid_pid.0, settings.vid_pid.1))
            .usb_rev(UsbRev::Usb200)
            .strings(settings.string_descriptors)
            .unwrap()
            .supports_remote_wakeup(true)
            .build();

        Self {
            usb_dev,
            keyboard_ep,
            consumer_ep,
            parked_keyboard: None,
            parked_consumer: None,
        }
    }

    /// Ok(true) = accepted, Ok(false) = endpoint busy.
    fn push_now<R: AsInputReport>(
        ep: &HIDClass<'usb, B>,
        report: &R,
    ) -> Result<bool, HidPushError> {
        match ep.push_input(report) {
            Ok(_) => Ok(true),
            Err(UsbError::WouldBlock) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl<'usb, B: UsbBus> HidBus for UsbHidBus<'usb, B> {
    fn push_keyboard(&mut self, report: KeyboardReport) -> Result<(), HidPushError> {
        if Self::push_now(&self.keyboard_ep, &report)? {
            self.parked_keyboard = None;
        } else {
            self.parked_keyboard = Some(report);
        }
        Ok(())
    }

    fn push_consumer(&mut self, report: MediaKeyboardReport) -> Result<(), HidPushError> {
        if Self::push_now(&self.consumer_ep, &report)? {
            self.parked_consumer = None;
        } else {
            self.parked_consumer = Some(report);
        }
        Ok(())
    }

    fn poll(&mut self) -> bool {
        if let Some(report) = &self.parked_keyboard {
            match Self::push_now(&self.keyboard_ep, report) {
                Ok(true) => self.parked_keyboard = None,
                Ok(false) => {}
                Err(e) => {
                    dev_error!("Dropping parked keyboard report: {}", e);
                    self.parked_keyboard = None;
                }
            }
        }
        if let Some(report) = &self.parked_consumer {
            match Self::push_now(&self.consumer_ep, report) {
                Ok(true) => self.parked_consumer = None,
                Ok(false) => {}
                Err(e) => {
                    dev_error!("Dropping parked consumer report: {}", e);
                    self.parked_consumer = None;
                }
            }
        }

        if self
            .usb_dev
            .poll(&mut [&mut self.keyboard_ep, &mut self.consumer_ep])
        {
            let mut buf = [0u8; 64];
            if let Ok(info) = self.keyboard_ep.pull_raw_report(&mut buf) {
                // Host LED state; the pad has no indicators to drive.
                dev_debug!("Output report {:?} ({} bytes)", info.report_type, info.len);
            }
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingBus {
        keyboard: Vec<(u8, [u8; REPORT_KEY_SLOTS]), 16>,
        consumer: Vec<u16, 16>,
    }

    impl HidBus for RecordingBus {
        fn push_keyboard(&mut self, report: KeyboardReport) -> Result<(), HidPushError> {
            self.keyboard
                .push((report.modifier, report.keycodes))
                .unwrap();
            Ok(())
        }

        fn push_consumer(&mut self, report: MediaKeyboardReport) -> Result<(), HidPushError> {
            self.consumer.push(report.usage_id).unwrap();
            Ok(())
        }

        fn poll(&mut self) -> bool {
            false
        }
    }

    #[test]
    fn modifier_usages_route_to_the_modifier_byte() {
        let mut state = HidReportState::new();
        state.set(KeyboardUsage::KeyboardLeftShift, true).unwrap();
        state.set(KeyboardUsage::KeyboardRightAlt, true).unwrap();
        assert_eq!(
            state.modifiers(),
            Modifiers::LEFT_SHIFT | Modifiers::RIGHT_ALT
        );
        assert_eq!(state.keycodes(), [0; REPORT_KEY_SLOTS]);

        state.set(KeyboardUsage::KeyboardLeftShift, false).unwrap();
        assert_eq!(state.modifiers(), Modifiers::RIGHT_ALT);
    }

    #[test]
    fn overflow_evicts_the_oldest_key() {
        let mut state = HidReportState::new();
        for code in 0x04..=0x09u8 {
            state.set_code(code, true).unwrap();
        }
        assert_eq!(state.keycodes(), [0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);

        // The seventh key pushes out 0x04, the earliest one, and only
        // that one.
        state.set_code(0x0a, true).unwrap();
        assert_eq!(state.keycodes(), [0x05, 0x06, 0x07, 0x08, 0x09, 0x0a]);
    }

    #[test]
    fn releasing_an_evicted_key_is_a_no_op() {
        let mut state = HidReportState::new();
        for code in 0x04..=0x0au8 {
            state.set_code(code, true).unwrap();
        }
        state.set_code(0x04, false).unwrap();
        assert_eq!(state.keycodes(), [0x05, 0x06, 0x07, 0x08, 0x09, 0x0a]);
    }

    #[test]
    fn null_and_rollover_usages_are_rejected() {
        let mut state = HidReportState::new();
        assert_eq!(state.set_code(0x00, true), Err(KeyChangeError::Unsupported));
        assert_eq!(
            state.set(KeyboardUsage::KeyboardErrorRollOver, true),
            Err(KeyChangeError::Unsupported)
        );
        assert_eq!(state.keycodes(), [0; REPORT_KEY_SLOTS]);
    }

    #[test]
    fn flush_only_transmits_changes() {
        let mut state = HidReportState::new();
        let mut bus = RecordingBus::default();

        // Nothing pending, nothing sent.
        state.flush(&mut bus);
        assert!(bus.keyboard.is_empty());

        state.set(KeyboardUsage::KeyboardAa, true).unwrap();
        state.flush(&mut bus);
        state.flush(&mut bus);
        assert_eq!(bus.keyboard.len(), 1);
        assert_eq!(bus.keyboard[0], (0, [0x04, 0, 0, 0, 0, 0]));

        state.set(KeyboardUsage::KeyboardAa, false).unwrap();
        state.flush(&mut bus);
        assert_eq!(bus.keyboard.len(), 2);
        assert_eq!(bus.keyboard[1], (0, [0; REPORT_KEY_SLOTS]));
    }

    #[test]
    fn media_stream_is_flushed_independently() {
        let mut state = HidReportState::new();
        let mut bus = RecordingBus::default();

        state.set_media(MediaKey::Mute, true);
        state.flush(&mut bus);
        assert!(bus.keyboard.is_empty());
        assert_eq!(&bus.consumer[..], [MediaKey::Mute as u16]);

        state.set_media(MediaKey::Mute, false);
        state.flush(&mut bus);
        assert_eq!(&bus.consumer[..], [MediaKey::Mute as u16, 0]);
    }

    #[test]
    fn releasing_a_superseded_media_key_keeps_the_current_one() {
        let mut state = HidReportState::new();
        state.set_media(MediaKey::VolumeIncrement, true);
        state.set_media(MediaKey::VolumeDecrement, true);
        state.set_media(MediaKey::VolumeIncrement, false);
        assert_eq!(state.media(), MediaKey::VolumeDecrement as u16);
    }
}
