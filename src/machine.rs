//! The top-level `Machine`: owns the CPU, memory, execute segments, and the
//! syscall/segment-change callback tables the host installs.

use std::collections::HashMap;
use std::marker::PhantomData;

use crate::counter::InstructionCounter;
use crate::fault::{Fault, StopReason};
use crate::memory::Memory;
use crate::page::PageAttrs;
use crate::registers::RegisterFile;
use crate::segment::{ExecuteSegment, SegmentTable};
use crate::width::{Address, GuestWidth};

pub const REG_A0: u8 = 10;
pub const REG_A7: u8 = 17;

/// Configuration accepted at construction time. A plain `Copy` struct, following
/// the teacher's preference for straightforward structs over builder macros
/// (`sys/kernel/arch/riscv/src/cpu.rs`'s `Sstatus` is likewise a flat field set).
#[derive(Clone, Copy, Debug)]
pub struct MachineOptions {
    pub memory_max: u64,
    pub use_memory_arena: bool,
    pub allow_write_exec_segment: bool,
    pub verbose_instructions: bool,
    pub decoder_rewriter_enabled: bool,
    pub compressed_enabled: bool,
    pub max_instructions: u64,
}

impl Default for MachineOptions {
    fn default() -> Self {
        MachineOptions {
            memory_max: 64 << 20,
            use_memory_arena: false,
            allow_write_exec_segment: false,
            verbose_instructions: false,
            decoder_rewriter_enabled: true,
            compressed_enabled: false,
            max_instructions: u64::MAX,
        }
    }
}

pub(crate) type SyscallHandler<W> = Box<dyn FnMut(&mut Machine<W>) -> Result<(), Fault>>;
pub(crate) type UnhandledSyscallHandler<W> = Box<dyn FnMut(&mut Machine<W>, u64) -> Result<(), Fault>>;
pub(crate) type SegmentChangeHandler<W> = Box<dyn FnMut(&mut Machine<W>, u64, u64)>;

pub struct Machine<W: GuestWidth> {
    pub(crate) regs: RegisterFile<W>,
    pub(crate) memory: Memory,
    pub(crate) segments: SegmentTable,
    pub(crate) current_segment: Option<usize>,
    pub(crate) counter: InstructionCounter,
    pub(crate) options: MachineOptions,
    pub(crate) syscalls: HashMap<u64, SyscallHandler<W>>,
    pub(crate) unhandled_syscall: Option<UnhandledSyscallHandler<W>>,
    pub(crate) on_segment_change: Option<SegmentChangeHandler<W>>,
    pub(crate) halted: Option<i32>,
    _width: PhantomData<W>,
}

impl<W: GuestWidth> Machine<W> {
    pub fn new(options: MachineOptions) -> Self {
        log::debug!("creating {} machine, memory_max={:#x}", W::NAME, options.memory_max);
        Machine {
            regs: RegisterFile::new(),
            memory: Memory::new(options.memory_max),
            segments: SegmentTable::new(),
            current_segment: None,
            counter: InstructionCounter::new(),
            options,
            syscalls: HashMap::new(),
            unhandled_syscall: None,
            on_segment_change: None,
            halted: None,
            _width: PhantomData,
        }
    }

    pub fn options(&self) -> &MachineOptions {
        &self.options
    }

    pub fn registers(&self) -> &RegisterFile<W> {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile<W> {
        &mut self.regs
    }

    pub fn pc_u64(&self) -> u64 {
        self.regs.pc().as_u64()
    }

    pub fn set_pc_u64(&mut self, pc: u64) {
        self.regs.set_pc(W::Addr::from_u64(pc));
    }

    /// Moves execution to `pc`. Invalidates the cached current segment so the
    /// next `simulate` call re-resolves it (and fires `on_segment_change` if the
    /// target lies outside the segment that was active before this call).
    pub fn jump(&mut self, pc: u64) {
        self.set_pc_u64(pc);
        self.current_segment = None;
    }

    pub fn instruction_counter(&self) -> u64 {
        self.counter.executed()
    }

    /// Sets the instruction counter's absolute limit. Callable mid-`simulate`
    /// from inside a syscall handler — passing `0` (or `instruction_counter()`)
    /// makes the dispatch loop's next overflow check trip immediately, giving
    /// the host a cooperative way to cancel a run without a fault.
    pub fn set_max_instructions(&mut self, n: u64) {
        self.options.max_instructions = n;
        self.counter.set_max_instructions(n);
    }

    /// Maps `len` bytes at `addr` with `attrs`. Rejects a page that would be both
    /// writable and executable unless `allow_write_exec_segment` is set.
    pub fn map(&mut self, addr: u64, len: usize, attrs: PageAttrs) -> Result<(), Fault> {
        if attrs.contains(PageAttrs::WRITE | PageAttrs::EXEC) && !self.options.allow_write_exec_segment {
            return Err(Fault::ExecutionSpaceProtected { addr });
        }
        self.memory.map(addr, len, attrs)
    }

    /// Writes `bytes` into already-mapped, writable memory starting at `addr`.
    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), Fault> {
        for (i, b) in bytes.iter().enumerate() {
            self.memory.write::<u8>(addr + i as u64, *b, addr)?;
        }
        Ok(())
    }

    /// Builds and installs an execute segment covering `[base, base + bytes.len())`.
    /// The host is responsible for having mapped that range executable first.
    pub fn init_execute_area(&mut self, base: u64, bytes: Vec<u8>) -> Result<(), Fault> {
        let segment = ExecuteSegment::build(base, bytes, self.options.decoder_rewriter_enabled)?;
        self.segments.insert(segment);
        self.current_segment = None;
        Ok(())
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Value of `a0..a6` for the guest's current syscall ABI state.
    pub fn syscall_arg(&self, n: u8) -> u64 {
        self.regs.get(REG_A0 + n).as_u64()
    }

    pub fn syscall_number(&self) -> u64 {
        self.regs.get(REG_A7).as_u64()
    }

    pub fn set_syscall_return(&mut self, value: u64) {
        self.regs.set(REG_A0, W::Addr::from_u64(value));
    }

    /// Called by a host syscall handler to end the current `simulate` call cleanly.
    pub fn request_halt(&mut self, exit_code: i32) {
        self.halted = Some(exit_code);
    }

    pub fn register_syscall<F>(&mut self, number: u64, handler: F)
    where
        F: FnMut(&mut Machine<W>) -> Result<(), Fault> + 'static,
    {
        self.syscalls.insert(number, Box::new(handler));
    }

    pub fn set_unhandled_syscall<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Machine<W>, u64) -> Result<(), Fault> + 'static,
    {
        self.unhandled_syscall = Some(Box::new(handler));
    }

    /// `old_begin`/`new_begin` are the execute-segment base addresses; `old_begin`
    /// is 0 the first time a segment is entered.
    pub fn set_on_segment_change<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Machine<W>, u64, u64) + 'static,
    {
        self.on_segment_change = Some(Box::new(handler));
    }

    /// Runs until the budget (`max_instructions`, relative to the counter's current
    /// value) is exhausted, the guest halts, or a fault unwinds the loop.
    pub fn simulate(&mut self, max_instructions: u64) -> Result<StopReason, Fault> {
        self.counter.begin(max_instructions);
        self.halted = None;
        crate::dispatch::run(self)
    }

    /// Creates a new machine sharing this one's pages copy-on-write. Execute
    /// segments and register state are duplicated outright (they're small and
    /// immutable/private, unlike guest memory); syscall and segment-change
    /// handlers are host state and must be reinstalled by the caller.
    pub fn fork(&self) -> Machine<W>
    where
        W::Addr: Copy,
    {
        Machine {
            regs: self.regs.fork(),
            memory: self.memory.fork(),
            segments: self.segments.fork(),
            current_segment: self.current_segment,
            counter: self.counter,
            options: self.options,
            syscalls: HashMap::new(),
            unhandled_syscall: None,
            on_segment_change: None,
            halted: None,
            _width: PhantomData,
        }
    }
}
