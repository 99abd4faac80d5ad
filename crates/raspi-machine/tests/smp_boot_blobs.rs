use memory::{GuestMemory, RomSet};
use raspi_constants::{
    mbox3_read_clear_addr, spintable_slot_addr, BOARDSETUP_ADDR, GIB, MVBAR_ADDR, SMPBOOT_ADDR,
    SPINTABLE_ADDR, SPINTABLE_SLOTS,
};
use raspi_machine::smpboot::{
    write_secure_board_setup, BOARD_SETUP, MVBAR_VECTORS, SMPBOOT_32, SMPBOOT_64,
    SMPBOOT_ROM_NAME,
};
use raspi_machine::{BoardVersion, Machine, MachineConfig, TrampolineKind, VCpu};

fn read_words(mem: &dyn GuestMemory, addr: u64, count: usize) -> Vec<u32> {
    (0..count)
        .map(|i| mem.read_u32_le(addr + 4 * i as u64).unwrap())
        .collect()
}

#[test]
fn raspi3_direct_boot_layout() {
    let machine = Machine::with_defaults(MachineConfig::default()).unwrap();
    let boot = machine.boot_info();

    assert_eq!(boot.board_id, 0xc44);
    assert_eq!(boot.board_setup, None);
    assert!(!boot.secure_boot);
    assert_eq!(boot.trampoline(), Some(TrampolineKind::SixtyFourBit));
    assert_eq!(machine.board_rev(), 0xa02082);

    let mem = machine.memory();
    assert_eq!(
        read_words(mem, SMPBOOT_ADDR, SMPBOOT_64.len()),
        SMPBOOT_64.to_vec()
    );
    for core in 0..SPINTABLE_SLOTS {
        assert_eq!(mem.read_u64_le(spintable_slot_addr(core)).unwrap(), 0);
    }
    // No secure vectors on AArch64 boards.
    assert_eq!(mem.read_u32_le(MVBAR_ADDR).unwrap(), 0);

    let pcs: Vec<u64> = machine.cpus().iter().map(|cpu| cpu.pc()).collect();
    assert_eq!(pcs[1..], [SMPBOOT_ADDR; 3]);
    assert!(machine.cpus().iter().all(|cpu| cpu.is_aarch64()));
}

#[test]
fn raspi2_direct_boot_layout() {
    let machine = Machine::with_defaults(MachineConfig {
        version: BoardVersion::Raspi2,
        ..Default::default()
    })
    .unwrap();
    let boot = machine.boot_info();
    assert!(boot.secure_boot);
    assert_eq!(boot.trampoline(), Some(TrampolineKind::ThirtyTwoBit));
    assert_eq!(machine.board_rev(), 0xa21041);

    let mem = machine.memory();
    assert_eq!(
        read_words(mem, SMPBOOT_ADDR, SMPBOOT_32.len()),
        SMPBOOT_32.to_vec()
    );
    assert_eq!(
        read_words(mem, MVBAR_ADDR, MVBAR_VECTORS.len()),
        MVBAR_VECTORS.to_vec()
    );
    assert_eq!(
        read_words(mem, BOARDSETUP_ADDR, BOARD_SETUP.len()),
        BOARD_SETUP.to_vec()
    );
    // No spin table on the mailbox-based board.
    assert_eq!(mem.read_u64_le(SPINTABLE_ADDR).unwrap(), 0);

    let primary = &machine.cpus()[0];
    assert!(!primary.is_aarch64());
    assert_eq!(primary.reg(1), 0xc43);
}

#[test]
fn mailbox_literal_points_at_core0_read_clear_register() {
    let literal = SMPBOOT_32[SMPBOOT_32.len() - 1];
    assert_eq!(literal, mbox3_read_clear_addr(0));
    assert_eq!(mbox3_read_clear_addr(3) - literal, 3 * 16);
}

#[test]
fn spin_table_is_zeroed_again_on_reset() {
    let mut machine = Machine::with_defaults(MachineConfig {
        version: BoardVersion::Raspi4,
        ram_size_bytes: 2 << 30,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(machine.board_rev(), 0xb03111);

    // Stand in for a guest that released core 2 and then rebooted.
    machine
        .memory_mut()
        .write_u64_le(spintable_slot_addr(2), 0x8_0000)
        .unwrap();
    machine.cpus_mut()[2].set_pc(0x8_0000);

    machine.reset().unwrap();
    for core in 0..SPINTABLE_SLOTS {
        assert_eq!(
            machine
                .memory()
                .read_u64_le(spintable_slot_addr(core))
                .unwrap(),
            0
        );
    }
    assert_eq!(machine.cpus()[2].pc(), SMPBOOT_ADDR);
}

#[test]
fn trampoline_and_secure_setup_never_overlap() {
    let mut rom = RomSet::new();
    write_secure_board_setup(&mut rom, BOARDSETUP_ADDR).unwrap();
    TrampolineKind::ThirtyTwoBit
        .write(&mut rom, SMPBOOT_ADDR)
        .unwrap();

    let smpboot = rom.get(SMPBOOT_ROM_NAME).unwrap();
    assert!(smpboot.end() <= MVBAR_ADDR);

    let mut rom = RomSet::new();
    TrampolineKind::SixtyFourBit
        .write(&mut rom, SMPBOOT_ADDR)
        .unwrap();
    assert!(rom.get(SMPBOOT_ROM_NAME).unwrap().end() <= MVBAR_ADDR);
}

#[test]
fn raspi4_with_eight_gib_builds_without_backing_all_ram() {
    let mut machine = Machine::with_defaults(MachineConfig {
        version: BoardVersion::Raspi4,
        ram_size_bytes: 8 * GIB,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(machine.board_rev(), 0xd03111);
    assert_eq!(machine.memory().size(), 8 * GIB);

    let top = 8 * GIB - 8;
    machine.memory_mut().write_u64_le(top, 0xfeed_f00d).unwrap();
    machine.memory_mut().write_u64_le(spintable_slot_addr(1), 0x8_0000).unwrap();
    machine.reset().unwrap();

    let mem = machine.memory();
    for core in 0..SPINTABLE_SLOTS {
        assert_eq!(mem.read_u64_le(spintable_slot_addr(core)).unwrap(), 0);
    }
    // RAM outside the ROM blobs keeps its contents across reset.
    assert_eq!(mem.read_u64_le(top).unwrap(), 0xfeed_f00d);
    // Only the boot blobs at the bottom and the word at the top are backed.
    assert!(mem.allocated_chunks() <= 2, "{} chunks", mem.allocated_chunks());
}
