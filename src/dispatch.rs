//! The threaded-dispatch interpreter loop.
//!
//! Ported in spirit (not in literal control structure — see `SPEC_FULL.md` §9 on
//! computed goto) from `examples/original_source/lib/libriscv/cpu_dispatch.cpp`'s
//! `simulate_threaded`. When the remaining budget comfortably covers a whole
//! basic block, dispatch runs the block's slots back to back without
//! re-checking the budget after each one (the "amortized" fast path); once the
//! remaining budget is smaller than the block, dispatch falls back to a loop
//! that re-checks after every instruction so a `simulate(n)` call never retires
//! more than `n` instructions. Both paths credit the counter one instruction at
//! a time so a fault partway through a block leaves `instruction_counter()`
//! reflecting exactly the instructions that retired before the fault.

use crate::alu;
use crate::decode::{AluOp, AmoOp, BranchKind, Bytecode, ImmAluOp, LoadKind, OperandView, StoreKind};
use crate::fault::{Access, Fault, StopReason};
use crate::machine::Machine;
use crate::segment::Slot;
use crate::width::{Address, GuestWidth};

pub fn run<W: GuestWidth>(m: &mut Machine<W>) -> Result<StopReason, Fault> {
    loop {
        if m.counter.overflowed() {
            return Ok(StopReason::BudgetExhausted);
        }

        let pc = m.pc_u64();
        let seg_idx = m
            .segments
            .segment_for(pc)
            .ok_or(Fault::MissingPage { addr: pc, pc })?;

        if m.current_segment != Some(seg_idx) {
            let new_begin = m.segments.get(seg_idx).exec_begin;
            let old_begin = m
                .current_segment
                .map(|i| m.segments.get(i).exec_begin)
                .unwrap_or(0);
            if let Some(mut cb) = m.on_segment_change.take() {
                cb(m, old_begin, new_begin);
                m.on_segment_change = Some(cb);
            }
            m.current_segment = Some(seg_idx);
        }

        'block: loop {
            if m.counter.overflowed() {
                return Ok(StopReason::BudgetExhausted);
            }
            let pc = m.pc_u64();
            let seg = m.segments.get(seg_idx);
            if !seg.contains(pc) {
                break 'block;
            }
            let slot = *seg.slot(pc);
            let block_len = slot.idxend as u64 + 1;

            if m.counter.remaining() >= block_len {
                let mut cur_pc = pc;
                for _ in 0..block_len {
                    let s = *m.segments.get(seg_idx).slot(cur_pc);
                    execute_slot(m, cur_pc, s)?;
                    m.counter.add(1);
                    if let Some(exit_code) = m.halted {
                        return Ok(StopReason::Halted { exit_code });
                    }
                    cur_pc = m.pc_u64();
                }
            } else {
                loop {
                    let cur_pc = m.pc_u64();
                    let seg = m.segments.get(seg_idx);
                    if !seg.contains(cur_pc) {
                        break;
                    }
                    let s = *seg.slot(cur_pc);
                    let terminator = s.bytecode.terminates_block();
                    execute_slot(m, cur_pc, s)?;
                    if let Some(exit_code) = m.halted {
                        return Ok(StopReason::Halted { exit_code });
                    }
                    m.counter.add(1);
                    if m.counter.overflowed() || terminator {
                        break;
                    }
                }
            }
        }
    }
}

fn i_operands(view: OperandView, word_i: fn(u32) -> i32) -> (u8, u8, i32) {
    match view {
        OperandView::FastI { rs1, rd, imm, .. } => (rs1, rd, imm),
        OperandView::Raw(word) => (crate::decode::rs1(word), crate::decode::rd(word), word_i(word)),
        OperandView::FastJ { .. } => unreachable!("j-type view on i-type bytecode"),
    }
}

fn r_operands(view: OperandView) -> (u8, u8, u8) {
    match view {
        OperandView::FastI { rs1, rs2, rd, .. } => (rs1, rs2, rd),
        OperandView::Raw(word) => (
            crate::decode::rs1(word),
            crate::decode::rs2(word),
            crate::decode::rd(word),
        ),
        OperandView::FastJ { .. } => unreachable!("j-type view on r-type bytecode"),
    }
}

fn s_operands(view: OperandView) -> (u8, u8, i32) {
    match view {
        OperandView::FastI { rs1, rs2, imm, .. } => (rs1, rs2, imm),
        OperandView::Raw(word) => (
            crate::decode::rs1(word),
            crate::decode::rs2(word),
            crate::decode::imm_s(word),
        ),
        OperandView::FastJ { .. } => unreachable!("j-type view on s-type bytecode"),
    }
}

fn b_operands(view: OperandView) -> (u8, u8, i32) {
    match view {
        OperandView::FastI { rs1, rs2, imm, .. } => (rs1, rs2, imm),
        OperandView::Raw(word) => (
            crate::decode::rs1(word),
            crate::decode::rs2(word),
            crate::decode::imm_b(word),
        ),
        OperandView::FastJ { .. } => unreachable!("j-type view on b-type bytecode"),
    }
}

fn j_operands(view: OperandView) -> (u8, i32) {
    match view {
        OperandView::FastJ { rd, offset } => (rd, offset),
        OperandView::Raw(word) => (crate::decode::rd(word), crate::decode::imm_j(word)),
        OperandView::FastI { .. } => unreachable!("i-type view on j-type bytecode"),
    }
}

fn imm_alu_to_alu(op: ImmAluOp) -> AluOp {
    match op {
        ImmAluOp::Add => AluOp::Add,
        ImmAluOp::Slt => AluOp::Slt,
        ImmAluOp::Sltu => AluOp::Sltu,
        ImmAluOp::Xor => AluOp::Xor,
        ImmAluOp::Or => AluOp::Or,
        ImmAluOp::And => AluOp::And,
    }
}

/// Executes exactly one decoded instruction. Leaves `pc` positioned at the next
/// instruction to execute (whatever that is — fallthrough or a taken target) on
/// every path, including faults, per the fault layer's contract (`Fault::pc`).
fn execute_slot<W: GuestWidth>(m: &mut Machine<W>, pc: u64, slot: Slot) -> Result<(), Fault> {
    let xlen = W::XLEN_BITS;

    match slot.bytecode {
        Bytecode::Nop => {
            m.set_pc_u64(pc + 4);
        }
        Bytecode::Li => {
            let (_, rd, imm) = i_operands(slot.operand, crate::decode::imm_i);
            m.regs.set(rd, W::Addr::from_u64(imm as i64 as u64));
            m.set_pc_u64(pc + 4);
        }
        Bytecode::OpImm(op) => {
            let (rs1, rd, imm) = i_operands(slot.operand, crate::decode::imm_i);
            let a = m.regs.get(rs1).as_u64();
            let b = imm as i64 as u64;
            let result = alu::eval(imm_alu_to_alu(op), a, b, xlen);
            m.regs.set(rd, W::Addr::from_u64(result));
            m.set_pc_u64(pc + 4);
        }
        Bytecode::Slli | Bytecode::Srli | Bytecode::Srai => {
            let word = slot.operand.raw();
            let rs1 = crate::decode::rs1(word);
            let rd = crate::decode::rd(word);
            let shamt = (word >> 20) & (xlen - 1);
            let op = match slot.bytecode {
                Bytecode::Slli => AluOp::Sll,
                Bytecode::Srli => AluOp::Srl,
                _ => AluOp::Sra,
            };
            let a = m.regs.get(rs1).as_u64();
            let result = alu::eval(op, a, u64::from(shamt), xlen);
            m.regs.set(rd, W::Addr::from_u64(result));
            m.set_pc_u64(pc + 4);
        }
        Bytecode::Lui => {
            let word = slot.operand.raw();
            let rd = crate::decode::rd(word);
            let imm = crate::decode::imm_u(word);
            m.regs.set(rd, W::Addr::from_u64(imm as i64 as u64));
            m.set_pc_u64(pc + 4);
        }
        Bytecode::Auipc => {
            let word = slot.operand.raw();
            let rd = crate::decode::rd(word);
            let imm = crate::decode::imm_u(word);
            let value = pc.wrapping_add(imm as i64 as u64);
            m.regs.set(rd, W::Addr::from_u64(value));
            m.set_pc_u64(pc + 4);
        }
        Bytecode::Load(kind) => {
            let (rs1, rd, imm) = i_operands(slot.operand, crate::decode::imm_i);
            let addr = m.regs.get(rs1).wrapping_add_i64(imm as i64).as_u64();
            if matches!(kind, LoadKind::Ld) && xlen < 64 {
                return Err(Fault::UnknownInstruction {
                    pc,
                    word: slot.operand.raw_or_zero(),
                });
            }
            let value: u64 = match kind {
                LoadKind::Lb => m.memory.read::<u8>(addr, pc)? as i8 as i64 as u64,
                LoadKind::Lh => m.memory.read::<u16>(addr, pc)? as i16 as i64 as u64,
                LoadKind::Lw => m.memory.read::<u32>(addr, pc)? as i32 as i64 as u64,
                LoadKind::Ld => m.memory.read::<u64>(addr, pc)?,
                LoadKind::Lbu => u64::from(m.memory.read::<u8>(addr, pc)?),
                LoadKind::Lhu => u64::from(m.memory.read::<u16>(addr, pc)?),
            };
            m.regs.set(rd, W::Addr::from_u64(value));
            m.set_pc_u64(pc + 4);
        }
        Bytecode::Store(kind) => {
            let (rs1, rs2, imm) = s_operands(slot.operand);
            let addr = m.regs.get(rs1).wrapping_add_i64(imm as i64).as_u64();
            let value = m.regs.get(rs2).as_u64();
            if matches!(kind, StoreKind::Sd) && xlen < 64 {
                return Err(Fault::UnknownInstruction {
                    pc,
                    word: slot.operand.raw_or_zero(),
                });
            }
            match kind {
                StoreKind::Sb => m.memory.write::<u8>(addr, value as u8, pc)?,
                StoreKind::Sh => m.memory.write::<u16>(addr, value as u16, pc)?,
                StoreKind::Sw => m.memory.write::<u32>(addr, value as u32, pc)?,
                StoreKind::Sd => m.memory.write::<u64>(addr, value, pc)?,
            }
            m.set_pc_u64(pc + 4);
        }
        Bytecode::Branch(kind) => {
            let (rs1, rs2, imm) = b_operands(slot.operand);
            let a = m.regs.get(rs1);
            let b = m.regs.get(rs2);
            let taken = match kind {
                BranchKind::Beq => a == b,
                BranchKind::Bne => a != b,
                BranchKind::Blt => a.to_signed_i64() < b.to_signed_i64(),
                BranchKind::Bge => a.to_signed_i64() >= b.to_signed_i64(),
                BranchKind::Bltu => a.as_u64() < b.as_u64(),
                BranchKind::Bgeu => a.as_u64() >= b.as_u64(),
            };
            if taken {
                let target = W::Addr::from_u64(pc).wrapping_add_i64(imm as i64).as_u64();
                if target % 4 != 0 {
                    m.set_pc_u64(target);
                    return Err(Fault::MisalignedInstruction { pc: target });
                }
                m.set_pc_u64(target);
            } else {
                m.set_pc_u64(pc + 4);
            }
        }
        Bytecode::Jal | Bytecode::FastJal => {
            let (rd, offset) = j_operands(slot.operand);
            let target = W::Addr::from_u64(pc).wrapping_add_i64(offset as i64).as_u64();
            if target % 4 != 0 {
                m.set_pc_u64(target);
                return Err(Fault::MisalignedInstruction { pc: target });
            }
            m.regs.set(rd, W::Addr::from_u64(pc + 4));
            m.set_pc_u64(target);
        }
        Bytecode::Jalr => {
            let word = slot.operand.raw();
            let rs1 = crate::decode::rs1(word);
            let rd = crate::decode::rd(word);
            let imm = crate::decode::imm_i(word);
            let base = m.regs.get(rs1).wrapping_add_i64(imm as i64).as_u64();
            let target = base & !1u64;
            if target % 4 != 0 {
                m.set_pc_u64(target);
                return Err(Fault::MisalignedInstruction { pc: target });
            }
            m.regs.set(rd, W::Addr::from_u64(pc + 4));
            m.set_pc_u64(target);
        }
        Bytecode::Op(op) => {
            let (rs1, rs2, rd) = r_operands(slot.operand);
            let a = m.regs.get(rs1).as_u64();
            let b = m.regs.get(rs2).as_u64();
            let result = alu::eval(op, a, b, xlen);
            m.regs.set(rd, W::Addr::from_u64(result));
            m.set_pc_u64(pc + 4);
        }
        Bytecode::Amo(op) => {
            if !cfg!(feature = "atomics") {
                return Err(Fault::UnknownInstruction {
                    pc,
                    word: slot.operand.raw_or_zero(),
                });
            }
            execute_amo(m, pc, slot.operand, op, xlen)?;
        }
        Bytecode::Syscall => {
            m.set_pc_u64(pc + 4);
            dispatch_syscall(m, pc)?;
        }
        Bytecode::System => {
            // CSR and privileged instructions beyond plain ECALL/EBREAK have no
            // guest-visible effect in this userspace-only engine.
            m.set_pc_u64(pc + 4);
        }
        Bytecode::Function => {
            log::warn!("unimplemented extension opcode at pc={pc:#x}");
            return Err(Fault::UnknownInstruction {
                pc,
                word: slot.operand.raw_or_zero(),
            });
        }
        Bytecode::Invalid => {
            return Err(Fault::UnknownInstruction {
                pc,
                word: slot.operand.raw_or_zero(),
            });
        }
    }
    Ok(())
}

/// Executes one atomic memory operation. This engine has no multi-hart
/// concurrency model (`simulate` runs a single guest CPU on a single host
/// thread), so `LR`/`SC` have no reservation to track: `LR` is a plain load,
/// and `SC` always succeeds (writes 0 to `rd`) since nothing can have
/// invalidated a reservation between the two. The remaining read-modify-write
/// ops are atomic only in the sense that no other guest instruction can
/// observe the memory in between — true on this single-threaded dispatch loop
/// regardless.
fn execute_amo<W: GuestWidth>(
    m: &mut Machine<W>,
    pc: u64,
    operand: OperandView,
    op: AmoOp,
    xlen: u32,
) -> Result<(), Fault> {
    use AmoOp::*;
    let is_double = matches!(
        op,
        LrD | ScD | SwapD | AddD | XorD | AndD | OrD | MinD | MaxD | MinuD | MaxuD
    );
    if is_double && xlen < 64 {
        return Err(Fault::UnknownInstruction {
            pc,
            word: operand.raw_or_zero(),
        });
    }
    let (rs1, rs2, rd) = r_operands(operand);
    let addr = m.regs.get(rs1).as_u64();
    let rs2_val = m.regs.get(rs2).as_u64();

    if matches!(op, ScW | ScD) {
        if is_double {
            m.memory.write::<u64>(addr, rs2_val, pc)?;
        } else {
            m.memory.write::<u32>(addr, rs2_val as u32, pc)?;
        }
        m.regs.set(rd, W::Addr::from_u64(0));
        m.set_pc_u64(pc + 4);
        return Ok(());
    }

    let old: u64 = if is_double {
        m.memory.read::<u64>(addr, pc)?
    } else {
        m.memory.read::<u32>(addr, pc)? as i32 as i64 as u64
    };

    if matches!(op, LrW | LrD) {
        m.regs.set(rd, W::Addr::from_u64(old));
        m.set_pc_u64(pc + 4);
        return Ok(());
    }

    let old_signed = alu::sign_extend_xlen(old, if is_double { 64 } else { 32 });
    let rs2_signed = alu::sign_extend_xlen(rs2_val, if is_double { 64 } else { 32 });
    let new: u64 = match op {
        SwapW | SwapD => rs2_val,
        AddW | AddD => old.wrapping_add(rs2_val),
        XorW | XorD => old ^ rs2_val,
        AndW | AndD => old & rs2_val,
        OrW | OrD => old | rs2_val,
        MinW | MinD => if old_signed < rs2_signed { old } else { rs2_val },
        MaxW | MaxD => if old_signed > rs2_signed { old } else { rs2_val },
        MinuW | MinuD => {
            let mask = if is_double { u64::MAX } else { 0xffff_ffff };
            if (old & mask) < (rs2_val & mask) { old } else { rs2_val }
        }
        MaxuW | MaxuD => {
            let mask = if is_double { u64::MAX } else { 0xffff_ffff };
            if (old & mask) > (rs2_val & mask) { old } else { rs2_val }
        }
        LrW | LrD | ScW | ScD => unreachable!("handled above"),
    };

    if is_double {
        m.memory.write::<u64>(addr, new, pc)?;
    } else {
        m.memory.write::<u32>(addr, new as u32, pc)?;
    }
    m.regs.set(rd, W::Addr::from_u64(old));
    m.set_pc_u64(pc + 4);
    Ok(())
}

fn dispatch_syscall<W: GuestWidth>(m: &mut Machine<W>, pc: u64) -> Result<(), Fault> {
    let number = m.syscall_number();
    if let Some(mut handler) = m.syscalls.remove(&number) {
        let result = handler(m);
        m.syscalls.insert(number, handler);
        return result;
    }
    if let Some(mut handler) = m.unhandled_syscall.take() {
        let result = handler(m, number);
        m.unhandled_syscall = Some(handler);
        return result;
    }
    Err(Fault::SystemCallFailed { number, pc })
}

/// Explicit access-kind accessor used by callers that want to pre-flight a check
/// outside the dispatch loop (e.g. a debugger peeking at guest memory).
pub fn check_access<W: GuestWidth>(
    m: &mut Machine<W>,
    addr: u64,
    access: Access,
    pc: u64,
) -> Result<(), Fault> {
    match access {
        Access::Read => m.memory.read::<u8>(addr, pc).map(|_| ()),
        Access::Write => {
            let cur = m.memory.read::<u8>(addr, pc)?;
            m.memory.write::<u8>(addr, cur, pc)
        }
        Access::Execute => m.memory.fetch_word(addr).map(|_| ()),
    }
}
