use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use tracing::debug;

use crate::error::{Error, Result};

pub mod bitband;

pub trait MemoryMapped {
    fn get_size(&self) -> usize;
    fn read(&self, address: usize) -> u8;
    fn write(&mut self, address: usize, value: u8);
    fn write_slice(&mut self, address: usize, values: &[u8]) {
        for (i, b) in values.iter().enumerate() {
            self.write(address + i, *b);
        }
    }
}

pub type SharedMemory = Rc<RefCell<SystemMemory>>;

/// Static description of one region of a board's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpec {
    pub name: &'static str,
    pub base: usize,
    pub size: usize,
    pub fill: u8,
}

pub struct MappedRegion {
    pub name: String,
    pub base: usize,
    pub dev: Rc<RefCell<dyn MemoryMapped>>,
}

impl MappedRegion {
    pub fn end(&self) -> usize {
        self.base + self.dev.borrow().get_size()
    }
}

/// The flat physical address space seen by the core. Regions are kept
/// sorted by base address and never overlap.
pub struct SystemMemory {
    mm: Vec<MappedRegion>,
}

impl SystemMemory {
    pub fn new() -> Self {
        SystemMemory { mm: Vec::new() }
    }

    pub fn from_layout(layout: &[RegionSpec]) -> Result<Self> {
        let mut sm = SystemMemory::new();
        for spec in layout {
            let mem = Memory::try_new(spec.name, spec.size, spec.fill)?;
            sm.add(spec.name, spec.base, Rc::new(RefCell::new(mem)))?;
        }
        Ok(sm)
    }

    pub fn shared(self) -> SharedMemory {
        Rc::new(RefCell::new(self))
    }

    pub fn add(
        &mut self,
        name: &str,
        base: usize,
        dev: Rc<RefCell<dyn MemoryMapped>>,
    ) -> Result<()> {
        let size = dev.borrow().get_size();
        let end = base.checked_add(size).ok_or_else(|| Error::RegionOverlap {
            name: name.to_string(),
            base,
        })?;
        let idx = self.mm.partition_point(|r| r.base < base);
        let clash_prev = idx > 0 && self.mm[idx - 1].end() > base;
        let clash_next = idx < self.mm.len() && self.mm[idx].base < end;
        if clash_prev || clash_next {
            return Err(Error::RegionOverlap { name: name.to_string(), base });
        }
        debug!("[MEM] {} mapped at 0x{:08X}..0x{:08X}", name, base, end);
        self.mm.insert(idx, MappedRegion { name: name.to_string(), base, dev });
        Ok(())
    }

    pub fn regions(&self) -> &[MappedRegion] {
        &self.mm
    }

    pub fn region_at(&self, base: usize) -> Option<&MappedRegion> {
        self.mm.iter().find(|r| r.base == base)
    }

    fn get_dev(&self, address: usize) -> Result<(&MappedRegion, usize)> {
        let idx = self
            .mm
            .binary_search_by(|r| {
                if address < r.base {
                    Ordering::Greater
                } else if address >= r.end() {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .map_err(|_| Error::Unmapped(address))?;
        Ok((&self.mm[idx], address - self.mm[idx].base))
    }

    pub fn read(&self, address: usize) -> Result<u8> {
        let (r, offset) = self.get_dev(address)?;
        let value = r.dev.borrow().read(offset);
        Ok(value)
    }

    pub fn write(&mut self, address: usize, value: u8) -> Result<()> {
        let (r, offset) = self.get_dev(address)?;
        r.dev.borrow_mut().write(offset, value);
        Ok(())
    }

    /// Little-endian 32-bit read.
    pub fn read_word(&self, address: usize) -> Result<u32> {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read(address + i)?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    /// Writes `values` starting at `address`, spanning adjacent regions if
    /// needed. Fails on the first unmapped byte; bytes before it stay written.
    pub fn write_block(&mut self, address: usize, values: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < values.len() {
            let (r, offset) = self.get_dev(address + done)?;
            let n = (r.end() - (address + done)).min(values.len() - done);
            r.dev.borrow_mut().write_slice(offset, &values[done..done + n]);
            done += n;
        }
        Ok(())
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Memory {
    mem: Vec<u8>,
}

impl Memory {
    pub fn try_new(name: &str, size: usize, fill: u8) -> Result<Self> {
        let mut mem = Vec::new();
        mem.try_reserve_exact(size).map_err(|_| Error::Construction {
            name: name.to_string(),
            size,
        })?;
        mem.resize(size, fill);
        Ok(Memory { mem })
    }
}

impl MemoryMapped for Memory {
    fn get_size(&self) -> usize {
        self.mem.len()
    }

    fn read(&self, address: usize) -> u8 {
        self.mem[address]
    }

    fn write(&mut self, address: usize, value: u8) {
        self.mem[address] = value;
    }

    fn write_slice(&mut self, address: usize, values: &[u8]) {
        self.mem[address..address + values.len()].copy_from_slice(values);
    }
}
