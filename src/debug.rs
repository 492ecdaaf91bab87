//! A minimal step-tracing harness, enough to make `verbose_instructions` and
//! `simulate(1)` single-stepping observable without resurrecting the original's
//! full (out-of-scope) interactive debugger.

use crate::fault::{Fault, StopReason};
use crate::machine::Machine;
use crate::width::GuestWidth;

/// Drives a machine one instruction at a time, logging the retired PC after each
/// step. Useful in tests and for a host that wants a simple execution trace
/// without hand-rolling the `simulate(1)` loop itself.
pub struct StepTrace<'m, W: GuestWidth> {
    machine: &'m mut Machine<W>,
    steps: u64,
}

impl<'m, W: GuestWidth> StepTrace<'m, W> {
    pub fn new(machine: &'m mut Machine<W>) -> Self {
        StepTrace { machine, steps: 0 }
    }

    /// Runs until `max_steps` instructions have retired or a fault/halt occurs.
    pub fn run(&mut self, max_steps: u64) -> Result<StopReason, Fault> {
        let mut reason = StopReason::BudgetExhausted;
        for _ in 0..max_steps {
            let before = self.machine.instruction_counter();
            reason = self.machine.simulate(1)?;
            let after = self.machine.instruction_counter();
            self.steps += after - before;
            if self.machine.options().verbose_instructions {
                log::trace!(
                    "step {}: pc={:#x} retired={}",
                    self.steps,
                    self.machine.pc_u64(),
                    after - before
                );
            }
            if matches!(reason, StopReason::Halted { .. }) {
                break;
            }
        }
        Ok(reason)
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineOptions;
    use crate::page::PageAttrs;
    use crate::width::Rv32;
    use std::sync::{Mutex, Once};

    struct CapturingLogger {
        lines: Mutex<Vec<String>>,
    }

    impl log::Log for CapturingLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            self.lines.lock().unwrap().push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    static LOGGER: CapturingLogger = CapturingLogger {
        lines: Mutex::new(Vec::new()),
    };
    static INIT: Once = Once::new();

    fn captured_logger() -> &'static CapturingLogger {
        INIT.call_once(|| {
            log::set_logger(&LOGGER).expect("install test logger");
            log::set_max_level(log::LevelFilter::Trace);
        });
        LOGGER.lines.lock().unwrap().clear();
        &LOGGER
    }

    fn addi_a0_1_twice() -> Vec<u8> {
        let word = 0x0010_0513u32; // addi a0, x0, 1
        word.to_le_bytes().into_iter().chain(word.to_le_bytes()).collect()
    }

    #[test]
    fn verbose_instructions_gates_step_trace_logging() {
        let logger = captured_logger();

        let mut options = MachineOptions::default();
        options.verbose_instructions = false;
        let mut machine = Machine::<Rv32>::new(options);
        let program = addi_a0_1_twice();
        machine.map(0x1000, program.len(), PageAttrs::EXEC).unwrap();
        machine.init_execute_area(0x1000, program).unwrap();
        machine.jump(0x1000);
        StepTrace::new(&mut machine).run(2).unwrap();
        assert!(logger.lines.lock().unwrap().iter().all(|l| !l.starts_with("step ")));

        let mut options = MachineOptions::default();
        options.verbose_instructions = true;
        let mut machine = Machine::<Rv32>::new(options);
        let program = addi_a0_1_twice();
        machine.map(0x1000, program.len(), PageAttrs::EXEC).unwrap();
        machine.init_execute_area(0x1000, program).unwrap();
        machine.jump(0x1000);
        StepTrace::new(&mut machine).run(2).unwrap();
        assert!(logger.lines.lock().unwrap().iter().any(|l| l.starts_with("step ")));
    }
}
