//! Black-box scenarios against the public `Machine` API.

use rvsim_core::page::PageAttrs;
use rvsim_core::{Fault, Machine, MachineOptions, Rv32, StopReason};

fn program_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn count_exactly_program() -> Vec<u8> {
    // li a0, 666 ; li a7, 93 ; jal x0, -4
    program_bytes(&[0x29a0_0513, 0x05d0_0893, 0xffdf_f06f])
}

#[test]
fn count_exactly() {
    let mut machine = Machine::<Rv32>::new(MachineOptions::default());
    let program = count_exactly_program();
    machine.map(0x1000, program.len(), PageAttrs::EXEC).unwrap();
    machine.init_execute_area(0x1000, program).unwrap();
    machine.jump(0x1000);

    machine.simulate(3).unwrap();
    assert_eq!(machine.registers().get(10), 666);
    assert_eq!(machine.registers().get(17), 93);
    assert_eq!(machine.instruction_counter(), 3);

    machine.registers_mut().set(17, 0);
    machine.simulate(2).unwrap();
    assert_eq!(machine.instruction_counter(), 5);
    assert_eq!(machine.registers().get(17), 93);
}

#[test]
fn truncated_budget_is_exact_mid_block() {
    let mut machine = Machine::<Rv32>::new(MachineOptions::default());
    let program = count_exactly_program();
    machine.map(0x1000, program.len(), PageAttrs::EXEC).unwrap();
    machine.init_execute_area(0x1000, program).unwrap();
    machine.jump(0x1000);

    let reason = machine.simulate(2).unwrap();
    assert_eq!(reason, StopReason::BudgetExhausted);
    assert_eq!(machine.instruction_counter(), 2);
    assert_eq!(machine.registers().get(10), 666);
    assert_eq!(machine.registers().get(17), 93);
    // third instruction (the jump back) has not retired yet
    assert_eq!(machine.pc_u64(), 0x1008);
}

#[test]
fn fault_on_missing_page() {
    let mut machine = Machine::<Rv32>::new(MachineOptions::default());
    // lui a0, 9 (a0 = 0x9000) ; lw a0, 0(a0) -- the second instruction reads
    // from an address with no mapped page.
    let lui_a0 = program_bytes(&[(9u32 << 12) | (10 << 7) | 0x37]);
    let lw_a0 = program_bytes(&[0x0005_2503]);
    let mut program = lui_a0;
    program.extend_from_slice(&lw_a0);
    machine.map(0x1000, program.len(), PageAttrs::EXEC).unwrap();
    machine.init_execute_area(0x1000, program).unwrap();
    machine.jump(0x1000);

    let err = machine.simulate(10).unwrap_err();
    assert!(matches!(
        err,
        Fault::MissingPage {
            addr: 0x9000,
            pc: 0x1004
        }
    ));
}

#[test]
fn fuzzed_blob_terminates_via_fault() {
    // A 20-byte fuzzed instruction stream; any RISC-V decoder disagreeing on a
    // single bit here is expected to eventually hit an illegal encoding or an
    // out-of-segment jump. The property under test is termination with a clean
    // fault, not a specific fault kind.
    let bytes: Vec<u8> = vec![
        0x17, 0x00, 0x17, 0x60, 0x60, 0x60, 0x60, 0xff, 0x60, 0x60, 0x60, 0x60, 0x60, 0x60, 0x1c,
        0xff, 0xe3, 0xff, 0xff, 0xff,
    ];
    let mut options = MachineOptions::default();
    options.allow_write_exec_segment = true;
    let mut machine = Machine::<Rv32>::new(options);
    machine
        .map(0x2000, bytes.len(), PageAttrs::EXEC | PageAttrs::READ | PageAttrs::WRITE)
        .unwrap();
    machine.init_execute_area(0x2000, bytes).unwrap();
    machine.jump(0x2000);

    let result = machine.simulate(5000);
    assert!(result.is_err(), "fuzzed blob should fault, not run forever or succeed silently");
}

#[test]
fn cross_segment_jump_switches_decoder_cache() {
    let mut machine = Machine::<Rv32>::new(MachineOptions::default());
    // jal x0, +0x3000 -> target 0x4000 from pc=0x1000
    let first = program_bytes(&[encode_jal(0, 0x3000)]);
    let second = program_bytes(&[0x05d0_0893]); // li a7, 93

    machine.map(0x1000, first.len(), PageAttrs::EXEC).unwrap();
    machine.init_execute_area(0x1000, first).unwrap();
    machine.map(0x4000, second.len(), PageAttrs::EXEC).unwrap();
    machine.init_execute_area(0x4000, second).unwrap();

    let changes = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let changes_clone = changes.clone();
    machine.set_on_segment_change(move |_m, old, new| {
        changes_clone.borrow_mut().push((old, new));
    });

    machine.jump(0x1000);
    machine.simulate(2).unwrap();

    assert_eq!(machine.registers().get(17), 93);
    let log = changes.borrow();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], (0, 0x1000));
    assert_eq!(log[1], (0x1000, 0x4000));
}

fn encode_jal(rd: u8, offset: i32) -> u32 {
    let imm = offset as u32;
    (((imm >> 20) & 1) << 31)
        | (((imm >> 1) & 0x3ff) << 21)
        | (((imm >> 11) & 1) << 20)
        | (((imm >> 12) & 0xff) << 12)
        | ((rd as u32) << 7)
        | 0x6f
}

#[test]
fn fork_shares_pages_until_written() {
    let mut machine = Machine::<Rv32>::new(MachineOptions::default());
    machine
        .map(0x1000, 4096, PageAttrs::READ | PageAttrs::WRITE)
        .unwrap();
    machine.write_bytes(0x1000, &[1, 2, 3, 4]).unwrap();

    let mut child = machine.fork();
    child.write_bytes(0x1000, &[9, 9, 9, 9]).unwrap();

    assert_eq!(machine.memory_mut().read::<u32>(0x1000, 0).unwrap(), 0x0403_0201);
    assert_eq!(child.memory_mut().read::<u32>(0x1000, 0).unwrap(), 0x0909_0909);
}
