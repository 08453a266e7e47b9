use std::collections::BTreeSet;

use crate::error::Result;
use crate::machine::Board;
use crate::memory::RegionSpec;

use super::BoardDescriptor;

/// Main SYSCLK frequency in Hz
pub const SYSCLK_FRQ: u64 = 320_000_000;

pub const BOARD_NAME: &str = "NXPS32K3-board";
pub const BOARD_ALIAS: &str = "nxpS32K3-board";

pub const KERNEL_BASE: u32 = 0x0000_0000;
pub const KERNEL_MAX_SIZE: usize = 0x40_0000;

const S32K3_LAYOUT: [RegionSpec; 2] = [
    RegionSpec { name: "flash", base: 0x0000_0000, size: KERNEL_MAX_SIZE, fill: 0xFF },
    RegionSpec { name: "sram", base: 0x2000_0000, size: 0x8_0000, fill: 0x00 },
];

pub fn descriptor() -> BoardDescriptor {
    BoardDescriptor {
        name: BOARD_NAME.to_string(),
        alias: BOARD_ALIAS.to_string(),
        description: "NXPS32K3 Example Board".to_string(),
        default_cpus: 1,
        min_cpus: 1,
        max_cpus: 1,
        valid_cpu_types: BTreeSet::from(["cortex-m7".to_string()]),
        default_cpu_type: "cortex-m7".to_string(),
        sysclk_hz: SYSCLK_FRQ,
        enable_bitband: true,
        memory_layout: S32K3_LAYOUT.to_vec(),
        supports_removable_media: false,
        supports_parallel_port: false,
        init,
    }
}

fn init(board: &mut Board) -> Result<()> {
    let hz = board.descriptor().sysclk_hz;
    board.configure_clock("SYSCLK", hz)?;
    board.compose_core()?;
    // Properties are frozen from here on.
    board.realize()?;
    board.load_kernel(KERNEL_BASE, KERNEL_MAX_SIZE)
}
