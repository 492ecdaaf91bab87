//! Decoder cache and execute segments.
//!
//! An execute segment is an immutable `(bytes, exec_begin, exec_end)` triple plus
//! its decoder cache. `idxend` on the entry slot of each basic block lets the
//! dispatch loop pay PC/counter bookkeeping once per block rather than once per
//! instruction — see `dispatch::run` for the consumer side.

use crate::decode::{self, Bytecode, OperandView};
use crate::fault::Fault;

pub const INSTRUCTION_STRIDE: u64 = 4;

/// Caps a single basic block so a pathological straight-line run (or a
/// decoder desync on fuzzed bytes) can't grow an unbounded block.
pub const MAX_BLOCK_LEN: usize = 256;

#[derive(Clone, Copy, Debug)]
pub struct Slot {
    pub bytecode: Bytecode,
    pub operand: OperandView,
    /// Distance, in slots, from this slot to its block's terminator slot.
    pub idxend: u32,
}

#[derive(Clone)]
pub struct ExecuteSegment {
    pub exec_begin: u64,
    pub exec_end: u64,
    bytes: Vec<u8>,
    slots: Vec<Slot>,
    rewriter_enabled: bool,
}

impl ExecuteSegment {
    /// Builds a segment from `bytes`, which must cover `[exec_begin, exec_end)`.
    pub fn build(
        exec_begin: u64,
        bytes: Vec<u8>,
        rewriter_enabled: bool,
    ) -> Result<Self, Fault> {
        if bytes.len() as u64 % INSTRUCTION_STRIDE != 0 {
            return Err(Fault::InvalidProgram {
                reason: "execute segment length is not a multiple of the instruction stride",
            });
        }
        let exec_end = exec_begin + bytes.len() as u64;
        let count = bytes.len() / INSTRUCTION_STRIDE as usize;
        let mut slots = Vec::with_capacity(count);

        for i in 0..count {
            let off = i * INSTRUCTION_STRIDE as usize;
            let word = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
            let bytecode = decode::decode(word);
            let operand = if rewriter_enabled {
                decode::rewrite(bytecode, word).unwrap_or(OperandView::Raw(word))
            } else {
                OperandView::Raw(word)
            };
            slots.push(Slot {
                bytecode,
                operand,
                idxend: 0,
            });
        }

        let mut block_start = 0usize;
        for i in 0..count {
            let is_terminator = slots[i].bytecode.terminates_block()
                || i - block_start + 1 >= MAX_BLOCK_LEN
                || i + 1 == count;
            if is_terminator {
                for (j, slot) in slots[block_start..=i].iter_mut().enumerate() {
                    slot.idxend = (i - block_start - j) as u32;
                }
                block_start = i + 1;
            }
        }

        log::debug!(
            "execute segment [{exec_begin:#x}, {exec_end:#x}) decoded: {count} slots",
        );

        Ok(ExecuteSegment {
            exec_begin,
            exec_end,
            bytes,
            slots,
            rewriter_enabled,
        })
    }

    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.exec_begin && pc < self.exec_end
    }

    pub fn slot_index(&self, pc: u64) -> usize {
        ((pc - self.exec_begin) / INSTRUCTION_STRIDE) as usize
    }

    pub fn slot(&self, pc: u64) -> &Slot {
        &self.slots[self.slot_index(pc)]
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn rewriter_enabled(&self) -> bool {
        self.rewriter_enabled
    }
}

/// Holds the non-overlapping execute segments currently installed in a machine.
#[derive(Default)]
pub struct SegmentTable {
    segments: Vec<ExecuteSegment>,
}

impl SegmentTable {
    pub fn new() -> Self {
        SegmentTable {
            segments: Vec::new(),
        }
    }

    pub fn insert(&mut self, segment: ExecuteSegment) -> usize {
        let idx = self.segments.len();
        self.segments.push(segment);
        idx
    }

    pub fn segment_for(&self, pc: u64) -> Option<usize> {
        self.segments.iter().position(|s| s.contains(pc))
    }

    pub fn get(&self, index: usize) -> &ExecuteSegment {
        &self.segments[index]
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn fork(&self) -> SegmentTable {
        SegmentTable {
            segments: self.segments.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn li_a0_666_li_a7_93_jr_back() -> Vec<u8> {
        let li_a0 = (666u32 << 20) | (10 << 7) | 0x13;
        let li_a7 = (93u32 << 20) | (17 << 7) | 0x13;
        let jr_back: u32 = 0xffdf_f06f; // jal x0, -4
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&li_a0.to_le_bytes());
        bytes.extend_from_slice(&li_a7.to_le_bytes());
        bytes.extend_from_slice(&jr_back.to_le_bytes());
        bytes
    }

    #[test]
    fn single_block_has_matching_idxend_chain() {
        let seg = ExecuteSegment::build(0x1000, li_a0_666_li_a7_93_jr_back(), false).unwrap();
        assert_eq!(seg.slots().len(), 3);
        assert_eq!(seg.slots()[0].idxend, 2);
        assert_eq!(seg.slots()[1].idxend, 1);
        assert_eq!(seg.slots()[2].idxend, 0);
        assert!(seg.slots()[2].bytecode.terminates_block());
    }

    #[test]
    fn decoding_twice_is_deterministic() {
        let bytes = li_a0_666_li_a7_93_jr_back();
        let a = ExecuteSegment::build(0x1000, bytes.clone(), false).unwrap();
        let b = ExecuteSegment::build(0x1000, bytes, false).unwrap();
        for (sa, sb) in a.slots().iter().zip(b.slots()) {
            assert_eq!(sa.bytecode, sb.bytecode);
            assert_eq!(sa.idxend, sb.idxend);
        }
    }
}
