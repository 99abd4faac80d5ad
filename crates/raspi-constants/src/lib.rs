#![forbid(unsafe_code)]

//! Shared guest-physical address constants for the Raspberry Pi board family.
//!
//! The boot blobs (`raspi-machine`) and the ROM/memory layer (`memory`) must agree on these
//! addresses exactly: guest firmware and Linux hard-code them, so they are part of the boot ABI.
//!
//! Low-memory layout used during bring-up:
//!
//! - `0x0000_00d8..0x0000_00f8`: 64-bit spin table (one `u64` release slot per core)
//! - `0x0000_0100..`: ATAGS (placed by the kernel loader)
//! - `0x0000_0300..0x0000_0400`: secondary-core trampoline
//! - `0x0000_0400..0x0000_0420`: secure monitor vectors (MVBAR)
//! - `0x0000_0420..`: secure board setup stub

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;

/// Number of cores on every supported SoC.
pub const BCM283X_NCPUS: u32 = 4;

/// Guest address of the secondary-core trampoline.
///
/// Low enough to leave room for ATAGS below it.
pub const SMPBOOT_ADDR: u64 = 0x300;

/// Guest address of the secure monitor vector table.
pub const MVBAR_ADDR: u64 = 0x400;

/// Guest address of the secure board setup code, directly after the 8 monitor vectors.
pub const BOARDSETUP_ADDR: u64 = MVBAR_ADDR + 0x20;

/// Pi 2 firmware loads `kernel.img` here.
pub const FIRMWARE_ADDR_2: u64 = 0x8000;

/// Pi 3 and later firmware loads `kernel.img` (`kernel8.img`) here.
pub const FIRMWARE_ADDR_3: u64 = 0x80000;

/// Base of the Pi 3 bootloader spin table (`armstub8` convention).
pub const SPINTABLE_ADDR: u64 = 0xd8;

/// One release slot per core.
pub const SPINTABLE_SLOTS: usize = BCM283X_NCPUS as usize;

/// Size in bytes of the spin table block.
pub const SPINTABLE_SIZE: u64 = (SPINTABLE_SLOTS * core::mem::size_of::<u64>()) as u64;

/// Mailbox 3 read/clear register of core 0 in the BCM2836 local peripherals block.
///
/// Each core's register is [`MBOX_CORE_STRIDE`] bytes further on.
pub const MBOX3_READ_CLEAR_BASE: u32 = 0x4000_00cc;

/// Distance between per-core mailbox register banks.
pub const MBOX_CORE_STRIDE: u32 = 0x10;

/// Default size of the VideoCore RAM carve-out at the top of guest RAM.
pub const VCRAM_SIZE_DEFAULT: u64 = 0x0400_0000;

/// Returns the guest address of the 64-bit spin-table slot for `core`.
pub const fn spintable_slot_addr(core: usize) -> u64 {
    SPINTABLE_ADDR + (core as u64) * 8
}

/// Returns the address of the mailbox 3 read/clear register for `core`.
pub const fn mbox3_read_clear_addr(core: u32) -> u32 {
    MBOX3_READ_CLEAR_BASE + core * MBOX_CORE_STRIDE
}

const _: () = assert!(SPINTABLE_ADDR + SPINTABLE_SIZE <= SMPBOOT_ADDR);
const _: () = assert!(SMPBOOT_ADDR < MVBAR_ADDR);
const _: () = assert!(BOARDSETUP_ADDR < FIRMWARE_ADDR_2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spintable_slots_match_armstub8_layout() {
        assert_eq!(spintable_slot_addr(0), 0xd8);
        assert_eq!(spintable_slot_addr(1), 0xe0);
        assert_eq!(spintable_slot_addr(2), 0xe8);
        assert_eq!(spintable_slot_addr(3), 0xf0);
        assert_eq!(SPINTABLE_SIZE, 32);
    }

    #[test]
    fn mailbox_registers_are_sixteen_bytes_apart() {
        assert_eq!(mbox3_read_clear_addr(0), 0x4000_00cc);
        assert_eq!(mbox3_read_clear_addr(1), 0x4000_00dc);
        assert_eq!(mbox3_read_clear_addr(3), 0x4000_00fc);
    }

    #[test]
    fn board_setup_follows_monitor_vectors() {
        assert_eq!(MVBAR_ADDR, 0x400);
        assert_eq!(BOARDSETUP_ADDR, 0x420);
        // `mov pc, #imm` in the 32-bit trampoline encodes the target as an 8-bit value rotated
        // right by 28.
        assert_eq!(BOARDSETUP_ADDR & 0xf, 0);
        assert!(BOARDSETUP_ADDR >> 4 < 0x100);
    }

    #[test]
    fn firmware_load_addresses() {
        assert_eq!(FIRMWARE_ADDR_2, 0x8000);
        assert_eq!(FIRMWARE_ADDR_3, 0x80000);
    }
}
