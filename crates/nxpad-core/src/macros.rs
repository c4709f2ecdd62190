use heapless::Vec;
use nxpad_common::{dev_debug, dev_warn, time::Instant};
use usbd_hid::descriptor::KeyboardUsage;

use crate::hid::HidReportState;

/// One step of a macro sequence. `Tap` asserts the usage, keeps it
/// down for the engine's minimum hold duration and deasserts it
/// before the sequence may continue.
#[derive(Clone, Copy, Debug)]
pub enum MacroStep {
    Press(KeyboardUsage),
    Release(KeyboardUsage),
    Tap(KeyboardUsage),
}

/// Distinct usages a single execution can hold down at once.
const HELD_MAX: usize = 8;

#[derive(Clone, Copy)]
enum ExecState {
    Running,
    HoldingTap { code: u8, since: Instant },
    Done,
}

struct MacroExecution {
    seq: &'static [MacroStep],
    /// Physical key that triggered the sequence.
    origin: usize,
    step: usize,
    state: ExecState,
    /// Usages asserted by this execution and not deasserted yet.
    /// Whatever is left here when the sequence ends gets released, so
    /// a finished execution never leaves keys stuck in the report.
    held: Vec<u8, HELD_MAX>,
}

/// Runs macro sequences as cooperative tasks, advancing each live
/// execution by at most one step per tick so every step's effect goes
/// out in its own report. Executions on different keys run
/// independently; re-triggering a key whose execution is still live
/// is ignored.
pub struct MacroEngine<const EXECS: usize, const TAP_HOLD_MILLIS: u32> {
    executions: Vec<MacroExecution, EXECS>,
}

impl<const EXECS: usize, const TAP_HOLD_MILLIS: u32> MacroEngine<EXECS, TAP_HOLD_MILLIS> {
    pub const fn new() -> Self {
        const {
            assert!(TAP_HOLD_MILLIS > 0, "Tap hold duration cannot be empty");
        }

        Self {
            executions: Vec::new(),
        }
    }

    /// Starts `seq`, unless the key is re-triggering a sequence that
    /// has not finished yet. A full execution pool drops the trigger;
    /// both cases are non-fatal.
    pub fn trigger(&mut self, seq: &'static [MacroStep], origin: usize) {
        if self.executions.iter().any(|exec| exec.origin == origin) {
            dev_debug!("Macro re-trigger from key {} ignored", origin);
            return;
        }

        let execution = MacroExecution {
            seq,
            origin,
            step: 0,
            state: ExecState::Running,
            held: Vec::new(),
        };
        if self.executions.push(execution).is_err() {
            dev_warn!("Macro pool full, dropping trigger from key {}", origin);
        }
    }

    pub fn live_executions(&self) -> usize {
        self.executions.len()
    }

    /// Advances every live execution and drops the finished ones.
    pub fn tick(&mut self, now: Instant, report: &mut HidReportState) {
        for exec in self.executions.iter_mut() {
            Self::advance(exec, now, report);
        }
        self.executions
            .retain(|exec| !matches!(exec.state, ExecState::Done));
    }

    fn advance(exec: &mut MacroExecution, now: Instant, report: &mut HidReportState) {
        match exec.state {
            ExecState::Running => {
                let Some(step) = exec.seq.get(exec.step) else {
                    Self::finish(exec, report);
                    return;
                };
                match *step {
                    MacroStep::Press(key) => {
                        Self::assert_code(exec, report, key as u8);
                        exec.step += 1;
                    }
                    MacroStep::Release(key) => {
                        Self::deassert_code(exec, report, key as u8);
                        exec.step += 1;
                    }
                    MacroStep::Tap(key) => {
                        let code = key as u8;
                        if Self::assert_code(exec, report, code) {
                            exec.state = ExecState::HoldingTap { code, since: now };
                        } else {
                            // Rejected tap: nothing to hold, move on.
                            exec.step += 1;
                        }
                    }
                }
            }
            ExecState::HoldingTap { code, since } => {
                if now.millis_since(since) >= TAP_HOLD_MILLIS {
                    Self::deassert_code(exec, report, code);
                    exec.step += 1;
                    exec.state = ExecState::Running;
                }
            }
            ExecState::Done => {}
        }
    }

    fn assert_code(exec: &mut MacroExecution, report: &mut HidReportState, code: u8) -> bool {
        if report.set_code(code, true).is_err() {
            dev_warn!("Macro step rejected for usage {:#04x}, skipping", code);
            return false;
        }
        if !exec.held.contains(&code) && exec.held.push(code).is_err() {
            dev_warn!("Macro holds too many usages, {:#04x} untracked", code);
        }
        true
    }

    fn deassert_code(exec: &mut MacroExecution, report: &mut HidReportState, code: u8) {
        let _ = report.set_code(code, false);
        if let Some(pos) = exec.held.iter().position(|held| *held == code) {
            exec.held.remove(pos);
        }
    }

    fn finish(exec: &mut MacroExecution, report: &mut HidReportState) {
        while let Some(code) = exec.held.pop() {
            dev_warn!("Macro ended with usage {:#04x} asserted, releasing", code);
            let _ = report.set_code(code, false);
        }
        exec.state = ExecState::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::Modifiers;

    use MacroStep::{Press, Release, Tap};

    static GUI_TAP_S: [MacroStep; 3] = [
        Press(KeyboardUsage::KeyboardLeftGUI),
        Tap(KeyboardUsage::KeyboardSs),
        Release(KeyboardUsage::KeyboardLeftGUI),
    ];

    static LEAKY: [MacroStep; 2] = [
        Press(KeyboardUsage::KeyboardAa),
        Press(KeyboardUsage::KeyboardLeftShift),
    ];

    static REJECTED_FIRST: [MacroStep; 2] = [
        Press(KeyboardUsage::KeyboardErrorRollOver),
        Press(KeyboardUsage::KeyboardBb),
    ];

    fn at(millis: u32) -> Instant {
        Instant::from_millis(millis)
    }

    #[test]
    fn steps_advance_one_per_tick_in_order() {
        let mut engine: MacroEngine<4, 8> = MacroEngine::new();
        let mut report = HidReportState::new();

        engine.trigger(&GUI_TAP_S, 0);

        engine.tick(at(0), &mut report);
        assert_eq!(report.modifiers(), Modifiers::LEFT_GUI);
        assert_eq!(report.keycodes()[0], 0);

        engine.tick(at(1), &mut report);
        assert_eq!(report.keycodes()[0], KeyboardUsage::KeyboardSs as u8);

        // Tap is still holding: the release step may not run yet.
        engine.tick(at(2), &mut report);
        assert_eq!(report.keycodes()[0], KeyboardUsage::KeyboardSs as u8);
        assert_eq!(report.modifiers(), Modifiers::LEFT_GUI);

        engine.tick(at(9), &mut report);
        assert_eq!(report.keycodes()[0], 0);
        assert_eq!(report.modifiers(), Modifiers::LEFT_GUI);

        engine.tick(at(10), &mut report);
        assert_eq!(report.modifiers(), Modifiers::empty());

        engine.tick(at(11), &mut report);
        assert_eq!(engine.live_executions(), 0);
    }

    #[test]
    fn finished_execution_leaves_no_residual_state() {
        let mut engine: MacroEngine<4, 8> = MacroEngine::new();
        let mut report = HidReportState::new();

        engine.trigger(&LEAKY, 3);
        for millis in 0..5 {
            engine.tick(at(millis), &mut report);
        }

        assert_eq!(engine.live_executions(), 0);
        assert_eq!(report.keycodes(), [0; 6]);
        assert_eq!(report.modifiers(), Modifiers::empty());
    }

    #[test]
    fn retrigger_is_ignored_while_running() {
        let mut engine: MacroEngine<4, 8> = MacroEngine::new();
        let mut report = HidReportState::new();

        engine.trigger(&GUI_TAP_S, 0);
        engine.trigger(&GUI_TAP_S, 0);
        assert_eq!(engine.live_executions(), 1);

        // A different key runs its own execution concurrently.
        engine.trigger(&GUI_TAP_S, 1);
        assert_eq!(engine.live_executions(), 2);

        for millis in 0..20 {
            engine.tick(at(millis), &mut report);
        }
        assert_eq!(engine.live_executions(), 0);

        // Once finished, the same key may trigger again.
        engine.trigger(&GUI_TAP_S, 0);
        assert_eq!(engine.live_executions(), 1);
    }

    #[test]
    fn rejected_step_is_skipped_and_execution_continues() {
        let mut engine: MacroEngine<4, 8> = MacroEngine::new();
        let mut report = HidReportState::new();

        engine.trigger(&REJECTED_FIRST, 0);
        engine.tick(at(0), &mut report);
        assert_eq!(report.keycodes(), [0; 6]);

        engine.tick(at(1), &mut report);
        assert_eq!(report.keycodes()[0], KeyboardUsage::KeyboardBb as u8);

        for millis in 2..6 {
            engine.tick(at(millis), &mut report);
        }
        assert_eq!(engine.live_executions(), 0);
        assert_eq!(report.keycodes(), [0; 6]);
    }

    #[test]
    fn full_pool_drops_the_trigger() {
        let mut engine: MacroEngine<1, 8> = MacroEngine::new();
        engine.trigger(&GUI_TAP_S, 0);
        engine.trigger(&GUI_TAP_S, 1);
        assert_eq!(engine.live_executions(), 1);
    }

    #[test]
    fn tap_respects_the_minimum_hold_duration() {
        static JUST_TAP: [MacroStep; 1] = [Tap(KeyboardUsage::KeyboardZz)];

        let mut engine: MacroEngine<1, 8> = MacroEngine::new();
        let mut report = HidReportState::new();

        engine.trigger(&JUST_TAP, 0);
        engine.tick(at(100), &mut report);
        for millis in 101..108 {
            engine.tick(at(millis), &mut report);
            assert_eq!(report.keycodes()[0], KeyboardUsage::KeyboardZz as u8);
        }
        engine.tick(at(108), &mut report);
        assert_eq!(report.keycodes(), [0; 6]);
    }
}
