#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::mem::MaybeUninit;
use core::ptr::addr_of_mut;

use nxpad_common::dev_info;
use nxpad_common::scan::Polarity;
use nxpad_core::hid::{UsbHidBus, UsbHidSettings};
use nxpad_nexus_blackpill::config::*;
use nxpad_nexus_blackpill::keymap;
use nxpad_peripheral::clock::DwtClock;
use nxpad_peripheral::direct_pins::DirectPins;

#[allow(unused_imports)]
use panic_itm as _;

use cortex_m_rt::entry;
use stm32f4xx_hal::otg_fs::USB;
use stm32f4xx_hal::{pac, prelude::*, rcc::RccExt};
use synopsys_usb_otg::UsbBus;
use usb_device::LangID;
use usb_device::bus::UsbBusAllocator;
use usb_device::device::{StringDescriptors, UsbVidPid};

static mut EP_MEMORY: [u32; 1024] = [0; 1024];
static mut USB_ALLOC: MaybeUninit<UsbBusAllocator<UsbBus<USB>>> = MaybeUninit::uninit();
static mut KEYBOARD: MaybeUninit<TKeyboard<'static>> = MaybeUninit::uninit();

#[entry]
fn main() -> ! {
    main0()
}

fn main0() -> ! {
    let dp = pac::Peripherals::take().unwrap();
    let mut cortex = cortex_m::Peripherals::take().unwrap();

    let rcc = dp.RCC.constrain();

    // BlackPill F411: 25 MHz crystal, 96 MHz sysclk so the 48 MHz USB
    // clock comes out exact.
    let clocks = rcc
        .cfgr
        .use_hse(25.MHz())
        .sysclk(96.MHz())
        .pclk1(48.MHz())
        .pclk2(48.MHz())
        .require_pll48clk()
        .freeze();

    let gpioa = dp.GPIOA.split();

    itm_logger::init_with_level(log::Level::Info).unwrap();
    dev_info!("Nexus pad startup");

    let clock = DwtClock::new(&clocks, &mut cortex.DCB, &mut cortex.DWT);

    let usb = USB {
        usb_global: dp.OTG_FS_GLOBAL,
        usb_device: dp.OTG_FS_DEVICE,
        usb_pwrclk: dp.OTG_FS_PWRCLK,
        pin_dm: gpioa.pa11.into(),
        pin_dp: gpioa.pa12.into(),
        hclk: clocks.hclk(),
    };
    let usb_alloc =
        unsafe { USB_ALLOC.write(UsbBus::new(usb, addr_of_mut!(EP_MEMORY).as_mut().unwrap())) };

    let hid_bus = UsbHidBus::alloc(
        usb_alloc,
        &UsbHidSettings {
            vid_pid: UsbVidPid(0x16c0, 0x27db),
            string_descriptors: &[StringDescriptors::new(LangID::EN_US)
                .serial_number("0")
                .manufacturer("nxpad")
                .product("Nexus Pad")],
            poll_ms: 1,
        },
    );

    let scan = DirectPins::new(
        (
            gpioa.pa0.into_pull_up_input(),
            gpioa.pa1.into_pull_up_input(),
            gpioa.pa2.into_pull_up_input(),
            gpioa.pa3.into_pull_up_input(),
            gpioa.pa4.into_pull_up_input(),
            gpioa.pa5.into_pull_up_input(),
        ),
        Polarity::ActiveLow,
    );

    unsafe {
        KEYBOARD.write(TKeyboard::new(
            scan,
            TDebounce::new(),
            keymap::LAYOUT,
            hid_bus,
            clock,
        ));
    }

    loop {
        unsafe {
            KEYBOARD.assume_init_mut().poll();
        }
    }
}
