//! Hand-assembled boot blobs for secondary cores and the secure monitor.
//!
//! These words are transcriptions of code that guest kernels expect to find at fixed addresses.
//! Keep them as opaque constants: the tests pin the encodings that depend on the address layout,
//! and the `const` assertions below pin the layout itself.

use memory::{RomError, RomSet};
use raspi_constants::{
    BOARDSETUP_ADDR, MBOX3_READ_CLEAR_BASE, MVBAR_ADDR, SMPBOOT_ADDR, SPINTABLE_ADDR,
    SPINTABLE_SIZE,
};

pub const SMPBOOT_ROM_NAME: &str = "raspi_smpboot";
pub const SPINTABLES_ROM_NAME: &str = "raspi_spintables";
pub const MVBAR_ROM_NAME: &str = "board-setup-mvbar";
pub const BOARD_SETUP_ROM_NAME: &str = "board-setup";

/// AArch32 secondary boot (Pi 2).
///
/// Calls the board setup stub once, then polls this core's mailbox 3 until the primary posts an
/// entry point, acknowledges it by writing it back (mailbox 3 is read/clear) and branches there.
pub const SMPBOOT_32: [u32; 12] = [
    0xe1a0e00f,                                      //    mov     lr, pc
    0xe3a0fe00 + (BOARDSETUP_ADDR >> 4) as u32,      //    mov     pc, BOARDSETUP_ADDR
    0xee100fb0,                                      //    mrc     p15, 0, r0, c0, c0, 5 ;core id
    0xe7e10050,                                      //    ubfx    r0, r0, #0, #2
    0xe59f5014,                                      //    ldr     r5, =0x400000CC
    0xe320f001,                                      // 1: yield
    0xe7953200,                                      //    ldr     r3, [r5, r0, lsl #4]
    0xe3530000,                                      //    cmp     r3, #0
    0x0afffffb,                                      //    beq     1b
    0xe7853200,                                      //    str     r3, [r5, r0, lsl #4]
    0xe12fff13,                                      //    bx      r3
    MBOX3_READ_CLEAR_BASE,                           // literal: mailbox 3 read/clear base
];

/// AArch64 secondary boot (Pi 3 and later): spin-table protocol.
///
/// Each core sleeps in `wfe` until its slot at `SPINTABLE_ADDR + 8 * core` becomes non-zero, then
/// enters the posted address with x0..x3 cleared, as the arm64 boot protocol requires.
pub const SMPBOOT_64: [u32; 11] = [
    0xd2801b05, //        mov     x5, 0xd8
    0xd53800a6, //        mrs     x6, mpidr_el1
    0x924004c6, //        and     x6, x6, #0x3
    0xd503205f, // spin:  wfe
    0xf86678a4, //        ldr     x4, [x5,x6,lsl #3]
    0xb4ffffc4, //        cbz     x4, spin
    0xd2800000, //        mov     x0, #0x0
    0xd2800001, //        mov     x1, #0x0
    0xd2800002, //        mov     x2, #0x0
    0xd2800003, //        mov     x3, #0x0
    0xd61f0080, //        br      x4
];

/// Secure monitor vectors. Everything spins except SMC, which returns straight away.
pub const MVBAR_VECTORS: [u32; 8] = [
    0xeafffffe, // (spin)
    0xeafffffe, // (spin)
    0xe1b0f00e, // movs    pc, lr ;SMC exception return
    0xeafffffe, // (spin)
    0xeafffffe, // (spin)
    0xeafffffe, // (spin)
    0xeafffffe, // (spin)
    0xeafffffe, // (spin)
];

/// Secure board setup, entered once in secure mode before the kernel.
pub const BOARD_SETUP: [u32; 11] = [
    0xee110f51,                                  // mrc     p15, 0, r0, c1, c1, 2 ;read NSACR
    0xe3800b03,                                  // orr     r0, #0xc00            ;set CP11, CP10
    0xee010f51,                                  // mcr     p15, 0, r0, c1, c1, 2 ;write NSACR
    0xe3a00e00 + (MVBAR_ADDR >> 4) as u32,       // mov     r0, #MVBAR_ADDR
    0xee0c0f30,                                  // mcr     p15, 0, r0, c12, c0, 1 ;set MVBAR
    0xee110f11,                                  // mrc     p15, 0, r0, c1, c1, 0 ;read SCR
    0xe3800031,                                  // orr     r0, #0x31             ;AW, FW, NS
    0xee010f11,                                  // mcr     p15, 0, r0, c1, c1, 0 ;write SCR
    0xe1a0100e,                                  // mov     r1, lr                ;save LR
    0xe1600070,                                  // smc     #0                    ;flush SCR
    0xe1a0f001,                                  // mov     pc, r1                ;return
];

const fn blob_size(words: usize) -> u64 {
    (words * core::mem::size_of::<u32>()) as u64
}

pub const SMPBOOT_32_SIZE: u64 = blob_size(SMPBOOT_32.len());
pub const SMPBOOT_64_SIZE: u64 = blob_size(SMPBOOT_64.len());
pub const MVBAR_VECTORS_SIZE: u64 = blob_size(MVBAR_VECTORS.len());
pub const BOARD_SETUP_SIZE: u64 = blob_size(BOARD_SETUP.len());

// Trampolines must not run into the secure vectors.
const _: () = assert!(SMPBOOT_ADDR + SMPBOOT_32_SIZE <= MVBAR_ADDR);
const _: () = assert!(SMPBOOT_ADDR + SMPBOOT_64_SIZE <= MVBAR_ADDR);
// `mov pc, #BOARDSETUP_ADDR` needs an 8-bit immediate rotated by 28.
const _: () = assert!(BOARDSETUP_ADDR & 0xf == 0 && (BOARDSETUP_ADDR >> 4) < 0x100);
// MVBAR is 32-byte aligned and must be reachable with `mov r0, #imm`.
const _: () = assert!(MVBAR_ADDR & 0x1f == 0 && (MVBAR_ADDR >> 4) < 0x100);
const _: () = assert!(MVBAR_ADDR + MVBAR_VECTORS_SIZE <= BOARDSETUP_ADDR);
const _: () = assert!(SPINTABLE_ADDR + SPINTABLE_SIZE <= SMPBOOT_ADDR);

/// Which secondary-core trampoline a board needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrampolineKind {
    /// AArch32 mailbox polling loop.
    ThirtyTwoBit,
    /// AArch64 spin table.
    SixtyFourBit,
}

impl TrampolineKind {
    /// Registers the trampoline (and for AArch64 the zeroed spin table) in `rom`.
    pub fn write(self, rom: &mut RomSet, smp_loader_start: u64) -> Result<(), RomError> {
        match self {
            TrampolineKind::ThirtyTwoBit => write_smpboot(rom, smp_loader_start),
            TrampolineKind::SixtyFourBit => write_smpboot64(rom, smp_loader_start),
        }
    }
}

pub fn write_smpboot(rom: &mut RomSet, smp_loader_start: u64) -> Result<(), RomError> {
    rom.add_words_fixed(SMPBOOT_ROM_NAME, &SMPBOOT_32, smp_loader_start)
}

/// The spin-table slots are registered as ROM rather than written once, so each reset zeroes
/// them again before the primary core enters the kernel.
pub fn write_smpboot64(rom: &mut RomSet, smp_loader_start: u64) -> Result<(), RomError> {
    rom.add_words_fixed(SMPBOOT_ROM_NAME, &SMPBOOT_64, smp_loader_start)?;
    rom.add_blob_fixed(
        SPINTABLES_ROM_NAME,
        vec![0u8; SPINTABLE_SIZE as usize],
        SPINTABLE_ADDR,
    )
}

/// Installs the monitor vectors at `MVBAR_ADDR` and the setup stub at `board_setup_addr`.
pub fn write_secure_board_setup(
    rom: &mut RomSet,
    board_setup_addr: u64,
) -> Result<(), RomError> {
    rom.add_words_fixed(MVBAR_ROM_NAME, &MVBAR_VECTORS, MVBAR_ADDR)?;
    rom.add_words_fixed(BOARD_SETUP_ROM_NAME, &BOARD_SETUP, board_setup_addr)
}
