//! The slice of a processor core that board bring-up touches.
//!
//! Instruction execution lives elsewhere; bring-up only needs to place each core at its entry
//! point with the register state the boot protocol requires.

pub trait VCpu {
    fn cpu_index(&self) -> usize;

    fn is_aarch64(&self) -> bool;

    /// Returns the core to its architectural reset state.
    fn reset(&mut self);

    fn pc(&self) -> u64;

    fn set_pc(&mut self, pc: u64);

    /// Sets general purpose register `n` (`r<n>` / `x<n>`).
    fn set_reg(&mut self, n: usize, value: u64);

    fn reg(&self, n: usize) -> u64;
}

/// Number of argument registers tracked by [`ArmCpu`] (r0-r3 / x0-x3).
pub const ARM_ARG_REGS: usize = 4;

/// Minimal Cortex-A core state: program counter plus the argument registers the boot ABIs use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmCpu {
    index: usize,
    aarch64: bool,
    pc: u64,
    regs: [u64; ARM_ARG_REGS],
}

impl ArmCpu {
    pub fn new(index: usize, aarch64: bool) -> Self {
        Self {
            index,
            aarch64,
            pc: 0,
            regs: [0; ARM_ARG_REGS],
        }
    }
}

impl VCpu for ArmCpu {
    fn cpu_index(&self) -> usize {
        self.index
    }

    fn is_aarch64(&self) -> bool {
        self.aarch64
    }

    fn reset(&mut self) {
        self.pc = 0;
        self.regs = [0; ARM_ARG_REGS];
    }

    fn pc(&self) -> u64 {
        self.pc
    }

    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    fn set_reg(&mut self, n: usize, value: u64) {
        // Only the argument registers are modelled.
        if let Some(reg) = self.regs.get_mut(n) {
            *reg = if self.aarch64 { value } else { value & 0xffff_ffff };
        }
    }

    fn reg(&self, n: usize) -> u64 {
        self.regs.get(n).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aarch32_registers_are_truncated() {
        let mut cpu = ArmCpu::new(0, false);
        cpu.set_reg(1, 0x1_0000_0c43);
        assert_eq!(cpu.reg(1), 0xc43);
    }

    #[test]
    fn reset_clears_entry_state() {
        let mut cpu = ArmCpu::new(2, true);
        cpu.set_pc(0x300);
        cpu.set_reg(0, 0x100);
        cpu.reset();
        assert_eq!(cpu.pc(), 0);
        assert_eq!(cpu.reg(0), 0);
        assert_eq!(cpu.cpu_index(), 2);
    }
}
