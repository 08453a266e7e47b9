use std::cell::RefCell;
use std::rc::Rc;

use bitvec::prelude::*;

use super::MemoryMapped;

pub const BITBAND_SRAM_BASE: usize = 0x2000_0000;
pub const BITBAND_SRAM_ALIAS: usize = 0x2200_0000;
pub const BITBAND_PERIPH_BASE: usize = 0x4000_0000;
pub const BITBAND_PERIPH_ALIAS: usize = 0x4200_0000;

/// Alias window over a byte-addressed region. Each bit of the target is
/// exposed as a 32-bit word at `byte_offset * 32 + bit * 4`, reading as 0 or 1.
pub struct BitBand {
    target: Rc<RefCell<dyn MemoryMapped>>,
}

impl BitBand {
    pub fn new(target: Rc<RefCell<dyn MemoryMapped>>) -> Self {
        BitBand { target }
    }

    fn locate(address: usize) -> (usize, usize) {
        let word = address >> 2;
        (word >> 3, word & 0x7)
    }
}

impl MemoryMapped for BitBand {
    fn get_size(&self) -> usize {
        self.target.borrow().get_size() * 32
    }

    fn read(&self, address: usize) -> u8 {
        // Only the low byte of an alias word carries the bit.
        if address & 0x3 != 0 {
            return 0;
        }
        let (byte, bit) = Self::locate(address);
        let value = self.target.borrow().read(byte);
        value.view_bits::<Lsb0>()[bit] as u8
    }

    fn write(&mut self, address: usize, value: u8) {
        if address & 0x3 != 0 {
            return;
        }
        let (byte, bit) = Self::locate(address);
        let mut target = self.target.borrow_mut();
        let mut current = target.read(byte);
        current.view_bits_mut::<Lsb0>().set(bit, value & 0x1 != 0);
        target.write(byte, current);
    }
}
