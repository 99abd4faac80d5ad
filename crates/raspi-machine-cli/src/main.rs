#![forbid(unsafe_code)]

// Native-only tool. Keep a stub `main` so `--target wasm32-unknown-unknown --workspace` builds.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::io::{self, Write};
    use std::path::PathBuf;

    use anyhow::{anyhow, Context, Result};
    use clap::Parser;
    use memory::GuestMemory;
    use raspi_constants::{spintable_slot_addr, SPINTABLE_SLOTS};
    use raspi_machine::board::{decode_board_rev, size_to_str};
    use raspi_machine::{
        ArmBootLoader, Bcm283x, BoardVersion, Machine, MachineClass, MachineConfig, Soc,
        TrampolineKind, VCpu,
    };
    use tracing_subscriber::EnvFilter;

    #[derive(Debug, Parser)]
    #[command(about = "Assemble a Raspberry Pi board and print its identity and boot layout")]
    pub struct Args {
        /// Board to build: raspi2, raspi3 or raspi4.
        #[arg(long, default_value = "raspi3")]
        machine: BoardVersion,

        /// Guest RAM size, e.g. `1G`, `2GiB` or `1073741824`. Defaults to the board's default.
        #[arg(long, value_parser = parse_size)]
        ram: Option<u64>,

        /// Number of cores.
        #[arg(long)]
        smp: Option<u32>,

        /// Raw firmware image; all cores start executing it directly.
        #[arg(long, conflicts_with = "kernel")]
        firmware: Option<PathBuf>,

        /// Raw kernel image loaded at `--kernel-addr`.
        #[arg(long)]
        kernel: Option<PathBuf>,

        /// Guest physical load address of `--kernel`.
        #[arg(long, default_value = "0x10000", value_parser = parse_u64)]
        kernel_addr: u64,

        /// SD card image.
        #[arg(long)]
        sd: Option<PathBuf>,

        /// Also print every ROM blob as little-endian words.
        #[arg(long)]
        dump_rom: bool,
    }

    pub fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(io::stderr)
            .init();

        let args = Args::parse();

        let class = MachineClass::find(args.machine.name())
            .with_context(|| format!("no machine class for {}", args.machine))?;
        let cfg = MachineConfig {
            ram_size_bytes: args.ram.unwrap_or(class.default_ram_size),
            cpu_count: args.smp.unwrap_or(class.default_cpus),
            firmware: args.firmware.clone(),
            sd_image: args.sd.clone(),
            ..MachineConfig::for_class(&class)
        };

        let soc = Bcm283x::new(args.machine.info().board_rev.chip);
        let mut loader = ArmBootLoader::new();
        if let Some(kernel) = &args.kernel {
            loader = loader.with_kernel(kernel, args.kernel_addr);
        }

        tracing::debug!(?cfg, "assembling {}", class.desc);
        let machine = Machine::new(cfg, soc, loader).map_err(|e| anyhow!("{e}"))?;

        let stdout = io::stdout();
        let mut out = stdout.lock();
        print_summary(&mut out, &machine, &class)?;
        if args.dump_rom {
            print_rom(&mut out, &machine)?;
        }
        out.flush()?;
        Ok(())
    }

    fn print_summary(out: &mut impl Write, machine: &Machine, class: &MachineClass) -> Result<()> {
        let boot = machine.boot_info();
        let fields = decode_board_rev(machine.board_rev());

        writeln!(out, "machine:   {} ({})", class.name, class.desc)?;
        writeln!(out, "board id:  0x{:x}", machine.board_id())?;
        writeln!(
            out,
            "revision:  0x{:06x} (type 0x{:02x}, chip {}, manufacturer {}, rev {}, {} RAM)",
            machine.board_rev(),
            fields.board_type,
            fields.chip,
            fields.manufacturer,
            fields.revision,
            size_to_str(fields.ram_size()),
        )?;
        writeln!(out, "soc:       {}", machine.soc().type_name())?;
        writeln!(
            out,
            "ram:       {} configured, {} usable",
            size_to_str(machine.config().ram_size_bytes),
            size_to_str(boot.ram_size)
        )?;

        match boot.board_setup {
            Some(setup) => writeln!(out, "secure:    board setup at 0x{:x}", setup.addr)?,
            None => writeln!(out, "secure:    none")?,
        }
        match boot.secondary_boot {
            Some(smp) => {
                let kind = match smp.kind {
                    TrampolineKind::ThirtyTwoBit => "32-bit mailbox",
                    TrampolineKind::SixtyFourBit => "64-bit spin table",
                };
                writeln!(out, "smpboot:   {kind} at 0x{:x}", smp.smp_loader_start)?;
            }
            None => writeln!(out, "smpboot:   none")?,
        }
        if let Some(fw) = boot.firmware {
            writeln!(
                out,
                "firmware:  entry 0x{:x} ({} bytes)",
                fw.entry, fw.size
            )?;
        }

        if boot.trampoline() == Some(TrampolineKind::SixtyFourBit) && !boot.firmware_loaded() {
            let mem = machine.memory();
            for core in 0..SPINTABLE_SLOTS {
                let addr = spintable_slot_addr(core);
                let slot = mem
                    .read_u64_le(addr)
                    .with_context(|| format!("reading spin table slot {core}"))?;
                writeln!(out, "spintable: cpu{core} @ 0x{addr:x} = 0x{slot:x}")?;
            }
        }

        for cpu in machine.cpus() {
            writeln!(
                out,
                "cpu{}:      pc=0x{:x}{}",
                cpu.cpu_index(),
                cpu.pc(),
                if cpu.is_aarch64() { " (aarch64)" } else { "" }
            )?;
        }
        Ok(())
    }

    fn print_rom(out: &mut impl Write, machine: &Machine) -> Result<()> {
        for blob in machine.rom().blobs() {
            writeln!(
                out,
                "rom {} @ 0x{:x}..0x{:x}",
                blob.name(),
                blob.addr(),
                blob.end()
            )?;
            // Large images (firmware, kernels) are only summarised.
            if blob.len() > 0x100 {
                continue;
            }
            for (i, word) in blob.data().chunks(4).enumerate() {
                let mut bytes = [0u8; 4];
                bytes[..word.len()].copy_from_slice(word);
                writeln!(
                    out,
                    "  0x{:04x}: {:08x}",
                    blob.addr() + 4 * i as u64,
                    u32::from_le_bytes(bytes)
                )?;
            }
        }
        Ok(())
    }

    /// Parses a byte count with an optional binary suffix (`K`, `M`, `G`, `T`, optionally
    /// followed by `iB` or `B`).
    pub(crate) fn parse_size(s: &str) -> Result<u64, String> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid size {s:?}"))?;

        let shift = match suffix.to_ascii_uppercase().as_str() {
            "" | "B" => 0,
            "K" | "KB" | "KIB" => 10,
            "M" | "MB" | "MIB" => 20,
            "G" | "GB" | "GIB" => 30,
            "T" | "TB" | "TIB" => 40,
            _ => return Err(format!("invalid size suffix {suffix:?} in {s:?}")),
        };
        value
            .checked_mul(1u64 << shift)
            .ok_or_else(|| format!("size {s:?} overflows"))
    }

    fn parse_u64(s: &str) -> Result<u64, String> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
    }

}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
