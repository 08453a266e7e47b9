use std::cell::RefCell;
use std::rc::Rc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

use crate::clock::{Clock, ClockSource};
use crate::error::{Error, Result};
use crate::memory::bitband::{
    BitBand, BITBAND_PERIPH_ALIAS, BITBAND_PERIPH_BASE, BITBAND_SRAM_ALIAS, BITBAND_SRAM_BASE,
};
use crate::memory::SharedMemory;

const ARMV7M: &str = "armv7m";

lazy_static! {
    static ref CPU_TYPE_NAME: Regex =
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*?)(-arm-cpu)?$").unwrap();
}

/// Accepts `cortex-m7` or `cortex-m7-arm-cpu` and returns the bare model name.
pub fn normalize_cpu_type(name: &str) -> Result<String> {
    CPU_TYPE_NAME
        .captures(name)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| Error::InvalidCpuType(name.to_string()))
}

/// ARMv7-M container: one CPU plus the address-space glue around it.
/// Properties may only be set before `realize`.
pub struct ArmV7m {
    cpu_type: Option<String>,
    enable_bitband: bool,
    memory: Option<SharedMemory>,
    cpuclk: Option<Rc<RefCell<Clock>>>,
    realized: bool,
    sp: u32,
    pc: u32,
    entry: Option<u32>,
}

impl ArmV7m {
    pub fn new() -> Self {
        Self {
            cpu_type: None,
            enable_bitband: false,
            memory: None,
            cpuclk: None,
            realized: false,
            sp: 0,
            pc: 0,
            entry: None,
        }
    }

    fn check_unrealized(&self, property: &'static str) -> Result<()> {
        if self.realized {
            return Err(Error::AlreadyRealized(property));
        }
        Ok(())
    }

    pub fn set_cpu_type(&mut self, cpu_type: &str) -> Result<()> {
        self.check_unrealized("cpu-type")?;
        self.cpu_type = Some(normalize_cpu_type(cpu_type)?);
        Ok(())
    }

    pub fn set_enable_bitband(&mut self, enable: bool) -> Result<()> {
        self.check_unrealized("enable-bitband")?;
        self.enable_bitband = enable;
        Ok(())
    }

    pub fn link_memory(&mut self, memory: SharedMemory) -> Result<()> {
        self.check_unrealized("memory")?;
        self.memory = Some(memory);
        Ok(())
    }

    pub fn connect_clock(&mut self, clk: Rc<RefCell<Clock>>) -> Result<()> {
        self.check_unrealized("cpuclk")?;
        self.cpuclk = Some(clk);
        Ok(())
    }

    pub fn realize(&mut self) -> Result<()> {
        if self.realized {
            return Err(Error::Realization {
                component: ARMV7M,
                detail: "already realized".to_string(),
            });
        }
        let cpu_type = self.cpu_type.as_deref().ok_or_else(|| Error::Realization {
            component: ARMV7M,
            detail: "cpu-type property was not set".to_string(),
        })?;
        let memory = self.memory.as_ref().ok_or_else(|| Error::Realization {
            component: ARMV7M,
            detail: "memory property was not set".to_string(),
        })?;
        let clk = self.cpuclk.as_ref().ok_or_else(|| Error::Realization {
            component: ARMV7M,
            detail: "cpuclk must be connected".to_string(),
        })?;
        if clk.borrow().frequency_hz() == 0 {
            return Err(Error::Realization {
                component: ARMV7M,
                detail: format!("clock {} is not running", clk.borrow().name()),
            });
        }

        if self.enable_bitband {
            let mut mem = memory.borrow_mut();
            let windows = [
                (BITBAND_SRAM_BASE, BITBAND_SRAM_ALIAS),
                (BITBAND_PERIPH_BASE, BITBAND_PERIPH_ALIAS),
            ];
            for (base, alias) in windows {
                let target = match mem.region_at(base) {
                    Some(r) => Rc::clone(&r.dev),
                    None => continue,
                };
                let window = Rc::new(RefCell::new(BitBand::new(target)));
                mem.add(&format!("bitband@{:08X}", base), alias, window)
                    .map_err(|e| Error::Realization { component: ARMV7M, detail: e.to_string() })?;
            }
        }

        info!(
            "[CORE] {} realized at {} Hz, bitband {}",
            cpu_type,
            clk.borrow().frequency_hz(),
            if self.enable_bitband { "on" } else { "off" }
        );
        self.realized = true;
        Ok(())
    }

    /// Points the vector table at `base` and takes the reset exception:
    /// SP from the first vector word, PC from the second.
    pub fn set_entry(&mut self, base: u32) -> Result<()> {
        if !self.realized {
            return Err(Error::NotRealized("entry"));
        }
        let memory = self.memory.as_ref().ok_or_else(|| Error::Realization {
            component: ARMV7M,
            detail: "memory property was not set".to_string(),
        })?;
        let mem = memory.borrow();
        let addr = base as usize;
        let sp = mem.read_word(addr)?;
        let pc = mem.read_word(addr + 4)?;
        self.sp = sp;
        self.pc = pc & !1;
        self.entry = Some(base);
        debug!("[CORE] reset: vtor=0x{:08X} sp=0x{:08X} pc=0x{:08X}", base, self.sp, self.pc);
        Ok(())
    }

    pub fn cpu_type(&self) -> Option<&str> {
        self.cpu_type.as_deref()
    }

    pub fn bitband_enabled(&self) -> bool {
        self.enable_bitband
    }

    pub fn clock(&self) -> Option<&Rc<RefCell<Clock>>> {
        self.cpuclk.as_ref()
    }

    pub fn memory(&self) -> Option<&SharedMemory> {
        self.memory.as_ref()
    }

    pub fn entry(&self) -> Option<u32> {
        self.entry
    }

    pub fn sp(&self) -> u32 {
        self.sp
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }
}

impl Default for ArmV7m {
    fn default() -> Self {
        Self::new()
    }
}
