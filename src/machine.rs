use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, info};

use crate::boards::{BoardDescriptor, BoardRegistry};
use crate::clock::Clock;
use crate::cores::{normalize_cpu_type, ArmV7m};
use crate::error::{Error, Result};
use crate::loader::{load_image, LoadedImage};
use crate::memory::{SharedMemory, SystemMemory};

/// Run-time choices made by whoever starts the board.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub cpu_type: Option<String>,
    pub smp: u32,
    pub kernel: Option<PathBuf>,
    pub drives: Vec<PathBuf>,
    pub parallel: Option<String>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            cpu_type: None,
            smp: 1,
            kernel: None,
            drives: Vec::new(),
            parallel: None,
        }
    }
}

/// A `MachineConfig` checked against one board. Only `resolve` makes these,
/// so a board never sees an unsupported CPU type or core count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildParams {
    cpu_type: String,
    kernel: Option<PathBuf>,
}

impl BuildParams {
    pub fn resolve(desc: &BoardDescriptor, config: &MachineConfig) -> Result<Self> {
        if config.smp < desc.min_cpus || config.smp > desc.max_cpus {
            return Err(Error::InvalidCpuCount {
                board: desc.name.clone(),
                requested: config.smp,
                min: desc.min_cpus,
                max: desc.max_cpus,
            });
        }
        if !config.drives.is_empty() && !desc.supports_removable_media {
            return Err(Error::UnsupportedFeature {
                board: desc.name.clone(),
                feature: "removable media",
            });
        }
        if config.parallel.is_some() && !desc.supports_parallel_port {
            return Err(Error::UnsupportedFeature {
                board: desc.name.clone(),
                feature: "parallel port",
            });
        }

        let cpu_type = match &config.cpu_type {
            Some(name) => normalize_cpu_type(name)?,
            None => desc.default_cpu_type.clone(),
        };
        if !desc.valid_cpu_types.contains(&cpu_type) {
            return Err(Error::UnsupportedCpuType { board: desc.name.clone(), cpu_type });
        }

        Ok(BuildParams { cpu_type, kernel: config.kernel.clone() })
    }

    pub fn cpu_type(&self) -> &str {
        &self.cpu_type
    }

    pub fn kernel(&self) -> Option<&PathBuf> {
        self.kernel.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BoardState {
    Uninitialized,
    ClockConfigured,
    CoreComposed,
    Realized,
    Booted,
}

/// A live board. Owns its clock and core; the system memory is shared with
/// whoever created it.
pub struct Board {
    descriptor: BoardDescriptor,
    params: BuildParams,
    memory: SharedMemory,
    state: BoardState,
    sysclk: Option<Rc<RefCell<Clock>>>,
    mcu: Option<ArmV7m>,
    image: Option<LoadedImage>,
}

impl Board {
    pub fn new(descriptor: &BoardDescriptor, params: BuildParams, memory: SharedMemory) -> Self {
        Board {
            descriptor: descriptor.clone(),
            params,
            memory,
            state: BoardState::Uninitialized,
            sysclk: None,
            mcu: None,
            image: None,
        }
    }

    /// Runs the descriptor's construction routine.
    pub fn init(&mut self) -> Result<()> {
        let init = self.descriptor.init;
        init(self)
    }

    fn advance(&mut self, from: BoardState, to: BoardState) -> Result<()> {
        if self.state != from {
            return Err(Error::OutOfOrder { expected: from, found: self.state });
        }
        debug!("[BOARD] {}: {:?} -> {:?}", self.descriptor.name, from, to);
        self.state = to;
        Ok(())
    }

    fn out_of_order(&self, expected: BoardState) -> Error {
        Error::OutOfOrder { expected, found: self.state }
    }

    fn expect_state(&self, expected: BoardState) -> Result<()> {
        if self.state != expected {
            return Err(self.out_of_order(expected));
        }
        Ok(())
    }

    pub fn configure_clock(&mut self, name: &str, hz: u64) -> Result<()> {
        self.expect_state(BoardState::Uninitialized)?;
        let mut clk = Clock::new(name);
        clk.set_hz(hz);
        self.sysclk = Some(Rc::new(RefCell::new(clk)));
        self.advance(BoardState::Uninitialized, BoardState::ClockConfigured)
    }

    pub fn compose_core(&mut self) -> Result<()> {
        self.expect_state(BoardState::ClockConfigured)?;
        let sysclk = match &self.sysclk {
            Some(clk) => Rc::clone(clk),
            None => return Err(self.out_of_order(BoardState::ClockConfigured)),
        };
        let mut mcu = ArmV7m::new();
        mcu.connect_clock(sysclk)?;
        mcu.set_cpu_type(&self.params.cpu_type)?;
        mcu.set_enable_bitband(self.descriptor.enable_bitband)?;
        mcu.link_memory(Rc::clone(&self.memory))?;
        self.mcu = Some(mcu);
        self.advance(BoardState::ClockConfigured, BoardState::CoreComposed)
    }

    pub fn realize(&mut self) -> Result<()> {
        self.expect_state(BoardState::CoreComposed)?;
        match self.mcu.as_mut() {
            Some(mcu) => mcu.realize()?,
            None => return Err(self.out_of_order(BoardState::CoreComposed)),
        }
        self.advance(BoardState::CoreComposed, BoardState::Realized)
    }

    /// Loads the kernel image at `base` and resets the core into it. On
    /// failure the board stays realized.
    pub fn load_kernel(&mut self, base: u32, ceiling: usize) -> Result<()> {
        self.expect_state(BoardState::Realized)?;
        let path = self.params.kernel.clone().ok_or(Error::NoImage)?;
        let image = load_image(&mut self.memory.borrow_mut(), &path, base as usize, ceiling)?;
        match self.mcu.as_mut() {
            Some(mcu) => mcu.set_entry(base)?,
            None => return Err(self.out_of_order(BoardState::Realized)),
        }
        self.image = Some(image);
        self.advance(BoardState::Realized, BoardState::Booted)?;
        info!("[BOARD] {} booted from {}", self.descriptor.name, path.display());
        Ok(())
    }

    pub fn descriptor(&self) -> &BoardDescriptor {
        &self.descriptor
    }

    pub fn params(&self) -> &BuildParams {
        &self.params
    }

    pub fn state(&self) -> BoardState {
        self.state
    }

    pub fn clock(&self) -> Option<&Rc<RefCell<Clock>>> {
        self.sysclk.as_ref()
    }

    pub fn core(&self) -> Option<&ArmV7m> {
        self.mcu.as_ref()
    }

    #[cfg(test)]
    pub fn core_mut(&mut self) -> Option<&mut ArmV7m> {
        self.mcu.as_mut()
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn image(&self) -> Option<&LoadedImage> {
        self.image.as_ref()
    }
}

/// Selects `name` from the registry, checks `config` against it and builds
/// the board's system memory. The returned board is still uninitialized.
pub fn create(registry: &BoardRegistry, name: &str, config: &MachineConfig) -> Result<Board> {
    let desc = registry.lookup(name)?;
    let params = BuildParams::resolve(desc, config)?;
    let memory = SystemMemory::from_layout(&desc.memory_layout)?.shared();
    Ok(Board::new(desc, params, memory))
}
