use core::cell::Cell;

use cortex_m::peripheral::{DCB, DWT};
use nxpad_common::time::{Clock, Instant};
use stm32f4xx_hal::rcc::Clocks;

/// Millisecond tick clock derived from the DWT cycle counter.
pub struct DwtClock {
    clock_freq: u32,
    last_cycles: Cell<u32>,
    total_cycles: Cell<u64>,
}

impl DwtClock {
    pub fn new(clocks: &Clocks, dcb: &mut DCB, dwt: &mut DWT) -> Self {
        dcb.enable_trace();
        dwt.enable_cycle_counter();

        Self {
            clock_freq: clocks.sysclk().raw(),
            last_cycles: Cell::new(DWT::cycle_count()),
            total_cycles: Cell::new(0),
        }
    }
}

impl Clock for DwtClock {
    fn now(&self) -> Instant {
        // The cycle counter is 32 bits and wraps every ~44 s at
        // 96 MHz. Accumulating wrapping deltas keeps the count
        // correct provided now() runs at least once per wrap, which
        // the poll loop exceeds by orders of magnitude.
        let cycles = DWT::cycle_count();
        let delta = cycles.wrapping_sub(self.last_cycles.get());
        self.last_cycles.set(cycles);

        let total = self.total_cycles.get() + delta as u64;
        self.total_cycles.set(total);

        Instant::from_millis((total / (self.clock_freq as u64 / 1000)) as u32)
    }
}
