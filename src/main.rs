use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

mod boards;
mod clock;
mod cores;
mod error;
mod loader;
mod machine;
mod memory;

use crate::boards::BoardRegistry;
use crate::clock::ClockSource;
use crate::machine::{Board, BoardState, MachineConfig};

const EXIT_BOOTED: u8 = 0;
const EXIT_NOT_BOOTED: u8 = 2;

#[derive(Parser)]
#[command(name = "s32k3emu", about = "NXP S32K3 example board", version)]
struct Cli {
    /// Board name or alias, or `help` to list boards.
    #[arg(short = 'M', long = "machine", default_value = boards::s32k3::BOARD_NAME)]
    machine: String,

    /// CPU type, e.g. cortex-m7.
    #[arg(long = "cpu")]
    cpu: Option<String>,

    /// Number of CPUs.
    #[arg(long = "smp", default_value_t = 1)]
    smp: u32,

    /// Firmware image (raw binary, or Intel HEX with a .hex extension).
    #[arg(long = "kernel")]
    kernel: Option<PathBuf>,

    /// Removable media image.
    #[arg(long = "drive")]
    drive: Vec<PathBuf>,

    /// Parallel port backend.
    #[arg(long = "parallel")]
    parallel: Option<String>,

    /// Log board construction.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            cpu_type: self.cpu.clone(),
            smp: self.smp,
            kernel: self.kernel.clone(),
            drives: self.drive.clone(),
            parallel: self.parallel.clone(),
        }
    }
}

fn list_boards(registry: &BoardRegistry, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Supported machines are:")?;
    for b in registry.list() {
        writeln!(out, "{:<20} {}", b.name, b.description)?;
        if !b.alias.is_empty() {
            writeln!(out, "{:<20} {} (alias of {})", b.alias, b.description, b.name)?;
        }
        writeln!(out, "    SYSCLK {} Hz, CPU {}", b.sysclk_hz, b.default_cpu_type)?;
        for r in &b.memory_layout {
            writeln!(out, "    {:<8} 0x{:08X}..0x{:08X}", r.name, r.base, r.base + r.size)?;
        }
    }
    Ok(())
}

fn report(board: &Board, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "[BOARD] {} ({:?})", board.descriptor().name, board.state())?;
    if let Some(clk) = board.clock() {
        let clk = clk.borrow();
        writeln!(out, "[CLOCK] {} {} Hz", clk.name(), clk.frequency_hz())?;
    }
    for r in board.memory().borrow().regions() {
        writeln!(out, "[MEM] {:<18} 0x{:08X}..0x{:08X}", r.name, r.base, r.end())?;
    }
    match (board.params().kernel(), board.image()) {
        (Some(path), Some(image)) => writeln!(
            out,
            "[FIRMWARE] {} {} bytes, {:?}",
            path.display(),
            image.size,
            image.format
        )?,
        (Some(path), None) => writeln!(out, "[FIRMWARE] {} not loaded", path.display())?,
        (None, _) => writeln!(out, "[FIRMWARE] none")?,
    }
    if let Some(core) = board.core() {
        let cpu = board.params().cpu_type();
        match core.entry() {
            Some(entry) => writeln!(
                out,
                "[CORE] {} entry 0x{:08X} sp 0x{:08X} pc 0x{:08X}",
                cpu,
                entry,
                core.sp(),
                core.pc()
            )?,
            None => writeln!(out, "[CORE] {} not booted", cpu)?,
        }
    }
    Ok(())
}

/// Builds and boots the selected board. Returns the exit status for a board
/// that booted or was left realized; anything else is an error.
fn run(cli: &Cli, registry: &BoardRegistry, out: &mut impl Write) -> Result<u8> {
    if cli.machine == "help" {
        list_boards(registry, out)?;
        return Ok(EXIT_BOOTED);
    }

    let mut board = machine::create(registry, &cli.machine, &cli.machine_config())?;
    if let Err(e) = board.init() {
        let name = board.descriptor().name.clone();
        if board.state() != BoardState::Realized || e.is_fatal() {
            return Err(e).context(format!("failed to build {}", name));
        }
        warn!("board {} is realized but not running", name);
        error!("{}", e);
        report(&board, out)?;
        return Ok(EXIT_NOT_BOOTED);
    }

    report(&board, out)?;
    Ok(EXIT_BOOTED)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .init();

    let result = BoardRegistry::with_builtin()
        .context("board registration failed")
        .and_then(|registry| run(&cli, &registry, &mut io::stdout().lock()));
    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("s32k3emu: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boards::tests::example_board;
    use crate::error::Error;
    use crate::memory::RegionSpec;
    use std::path::Path;

    fn run_to_string(args: &[&str], registry: &BoardRegistry) -> (Result<u8>, String) {
        let cli = Cli::parse_from(args.iter().copied());
        let mut out = Vec::new();
        let code = run(&cli, registry, &mut out);
        (code, String::from_utf8(out).unwrap())
    }

    fn builtin() -> BoardRegistry {
        BoardRegistry::with_builtin().unwrap()
    }

    fn firmware(dir: &tempfile::TempDir, size: usize) -> PathBuf {
        let path = dir.path().join("valid.bin");
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    fn arg(path: &Path) -> &str {
        path.to_str().unwrap()
    }

    // Steps out of order from an uninitialized board.
    fn realize_first(board: &mut Board) -> crate::error::Result<()> {
        board.realize()
    }

    #[test]
    fn cli_defaults_to_s32k3() {
        let cli = Cli::parse_from(["s32k3emu"]);
        assert_eq!(cli.machine, boards::s32k3::BOARD_NAME);
        let cfg = cli.machine_config();
        assert_eq!(cfg.smp, 1);
        assert!(cfg.cpu_type.is_none());
        assert!(cfg.drives.is_empty());
    }

    #[test]
    fn cli_maps_onto_machine_config() {
        let cli = Cli::parse_from([
            "s32k3emu", "-M", "nxpS32K3-board", "--cpu", "cortex-m7", "--smp", "2",
            "--kernel", "fw.bin", "--drive", "a.img", "--drive", "b.img",
        ]);
        let cfg = cli.machine_config();
        assert_eq!(cfg.cpu_type.as_deref(), Some("cortex-m7"));
        assert_eq!(cfg.smp, 2);
        assert_eq!(cfg.kernel, Some(PathBuf::from("fw.bin")));
        assert_eq!(cfg.drives.len(), 2);
    }

    #[test]
    fn booted_board_reports_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fw = firmware(&dir, 1024);
        let (code, out) = run_to_string(&["s32k3emu", "--kernel", arg(&fw)], &builtin());
        assert_eq!(code.unwrap(), EXIT_BOOTED);
        assert!(out.contains("(Booted)"));
        assert!(out.contains("[CLOCK] SYSCLK 320000000 Hz"));
        assert!(out.contains("1024 bytes, Binary"));
        assert!(out.contains("[CORE] cortex-m7 entry 0x00000000"));
        assert!(!out.contains("not booted"));
    }

    #[test]
    fn realized_board_reports_not_booted() {
        let (code, out) = run_to_string(&["s32k3emu"], &builtin());
        assert_eq!(code.unwrap(), EXIT_NOT_BOOTED);
        assert!(out.contains("(Realized)"));
        assert!(out.contains("[FIRMWARE] none"));
        assert!(out.contains("[CORE] cortex-m7 not booted"));
        assert!(!out.contains("entry 0x"));
    }

    #[test]
    fn missing_firmware_is_reported_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let fw = dir.path().join("missing.bin");
        let (code, out) = run_to_string(&["s32k3emu", "--kernel", arg(&fw)], &builtin());
        assert_eq!(code.unwrap(), EXIT_NOT_BOOTED);
        assert!(out.contains("missing.bin not loaded"));
    }

    #[test]
    fn realization_failure_is_an_error() {
        let mut registry = BoardRegistry::new();
        let mut board = example_board("Clash");
        board.memory_layout = vec![
            RegionSpec { name: "sram", base: 0x2000_0000, size: 0x100, fill: 0 },
            // sits where the bit-band alias of sram has to go
            RegionSpec { name: "clash", base: 0x2200_0000, size: 0x10, fill: 0 },
        ];
        registry.register(board).unwrap();

        let (code, out) = run_to_string(&["s32k3emu", "-M", "Clash"], &registry);
        let err = code.unwrap_err();
        assert!(err.downcast_ref::<Error>().unwrap().is_fatal());
        assert!(out.is_empty());
    }

    #[test]
    fn early_configuration_error_is_not_exit_two() {
        let mut registry = BoardRegistry::new();
        let mut board = example_board("Early");
        board.init = realize_first;
        registry.register(board).unwrap();

        let (code, out) = run_to_string(&["s32k3emu", "-M", "Early"], &registry);
        let err = code.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::OutOfOrder { .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn unsupported_cpu_is_an_error() {
        let (code, out) = run_to_string(&["s32k3emu", "--cpu", "cortex-m4"], &builtin());
        let err = code.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnsupportedCpuType { .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn help_lists_topology() {
        let (code, out) = run_to_string(&["s32k3emu", "-M", "help"], &builtin());
        assert_eq!(code.unwrap(), EXIT_BOOTED);
        assert!(out.contains("NXPS32K3-board"));
        assert!(out.contains("nxpS32K3-board"));
        assert!(out.contains("SYSCLK 320000000 Hz, CPU cortex-m7"));
        assert!(out.contains("flash    0x00000000..0x00400000"));
    }
}
