//! A userspace RISC-V instruction-set emulator: page-granular guest memory,
//! a decoder cache built from immutable execute segments, and a threaded-dispatch
//! interpreter loop running over it.
//!
//! ```
//! use rvsim_core::{Machine, MachineOptions, Rv32};
//! use rvsim_core::page::PageAttrs;
//!
//! let mut options = MachineOptions::default();
//! options.allow_write_exec_segment = true;
//! let mut machine = Machine::<Rv32>::new(options);
//!
//! // li a0, 666 ; li a7, 93 ; jal x0, -4
//! let program: Vec<u8> = [0x29a00513u32, 0x05d00893, 0xffdff06f]
//!     .iter()
//!     .flat_map(|w| w.to_le_bytes())
//!     .collect();
//!
//! machine.map(0x1000, program.len(), PageAttrs::EXEC).unwrap();
//! machine.init_execute_area(0x1000, program).unwrap();
//! machine.jump(0x1000);
//!
//! machine.simulate(3).unwrap();
//! assert_eq!(machine.registers().get(10), 666); // a0
//! assert_eq!(machine.instruction_counter(), 3);
//! ```

pub mod alu;
pub mod counter;
pub mod debug;
pub mod decode;
pub mod dispatch;
pub mod fault;
pub mod machine;
pub mod memory;
pub mod page;
pub mod registers;
pub mod segment;
pub mod width;

pub use fault::{Access, Fault, StopReason};
pub use machine::{Machine, MachineOptions};
pub use page::PageAttrs;
pub use width::{GuestWidth, Rv32, Rv64};
