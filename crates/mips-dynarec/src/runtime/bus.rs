use crate::state::{CoreState, CpuState};
use log::warn;
use std::ptr::NonNull;

pub type PhysicalAddress = u32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("address {address:#010x} is not mapped")]
    AddressNotMapped { address: PhysicalAddress },
    #[error("{len:#x} bytes at {address:#010x} do not fit in memory")]
    OutOfRange {
        address: PhysicalAddress,
        len: usize,
    },
}

pub type BusResult<T> = Result<T, BusError>;

/// A range of guest addresses backed by plain host memory.
///
/// Guest address `start + n` lives at `ptr + n` for every `n < len`, stored little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastRegion {
    pub start: PhysicalAddress,
    pub len: u32,
    pub ptr: NonNull<u8>,
}

impl FastRegion {
    /// Whether the two regions share any guest address.
    pub fn overlaps(&self, other: &FastRegion) -> bool {
        let end = |region: &FastRegion| u64::from(region.start) + u64::from(region.len);
        u64::from(self.start) < end(other) && u64::from(other.start) < end(self)
    }

    pub fn contains(&self, addr: PhysicalAddress, size: u32) -> bool {
        addr.checked_sub(self.start)
            .is_some_and(|offset| u64::from(offset) + u64::from(size) <= u64::from(self.len))
    }
}

/// The guest memory subsystem, as seen by generated code.
pub trait Bus {
    fn read_u8(&mut self, addr: PhysicalAddress) -> BusResult<u8>;

    fn read_u16(&mut self, addr: PhysicalAddress) -> BusResult<u16>;

    fn read_u32(&mut self, addr: PhysicalAddress) -> BusResult<u32>;

    fn write_u8(&mut self, addr: PhysicalAddress, value: u8) -> BusResult<()>;

    fn write_u16(&mut self, addr: PhysicalAddress, value: u16) -> BusResult<()>;

    fn write_u32(&mut self, addr: PhysicalAddress, value: u32) -> BusResult<()>;

    /// Memory that generated code may access directly, bypassing the methods above.
    ///
    /// The first region is the main one: it is what masked accesses wrap into. Dynamic accesses check the
    /// others in order when an address misses it, e.g. a scratchpad next to main RAM. Regions must not overlap.
    ///
    /// Regions are queried once when the JIT is created. Their memory must stay allocated and in place for
    /// as long as the bus is owned by the JIT.
    fn fast_regions(&mut self) -> Vec<FastRegion> {
        Vec::new()
    }

    /// Called for every `syscall` instruction. Stops execution unless overridden.
    fn syscall(&mut self, state: &mut CpuState, code: u32) {
        warn!(
            "unhandled syscall {code:#x} at {:#010x}, stopping",
            state.pc().wrapping_sub(4)
        );
        state.set_core_state(CoreState::Stopping);
    }
}

/// A single block of little endian RAM starting at `base`, entirely exposed as the fast region.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    base: PhysicalAddress,
    data: Box<[u8]>,
}

impl FlatMemory {
    pub fn new(base: PhysicalAddress, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size].into_boxed_slice(),
        }
    }

    pub fn base(&self) -> PhysicalAddress {
        self.base
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies `bytes` into memory at the given guest address.
    pub fn load(&mut self, addr: PhysicalAddress, bytes: &[u8]) -> BusResult<()> {
        self.range_mut(addr, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Writes guest instruction words starting at `addr`.
    pub fn load_words(&mut self, addr: PhysicalAddress, words: &[u32]) -> BusResult<()> {
        let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        self.load(addr, &bytes)
    }

    pub fn bytes(&self, addr: PhysicalAddress, len: usize) -> BusResult<&[u8]> {
        let offset = self.offset(addr, len)?;
        Ok(&self.data[offset..offset + len])
    }

    fn offset(&self, addr: PhysicalAddress, len: usize) -> BusResult<usize> {
        let offset = addr
            .checked_sub(self.base)
            .ok_or(BusError::AddressNotMapped { address: addr })? as usize;
        if offset >= self.data.len() {
            return Err(BusError::AddressNotMapped { address: addr });
        }
        if offset + len > self.data.len() {
            return Err(BusError::OutOfRange { address: addr, len });
        }
        Ok(offset)
    }

    fn range_mut(&mut self, addr: PhysicalAddress, len: usize) -> BusResult<&mut [u8]> {
        let offset = self.offset(addr, len)?;
        Ok(&mut self.data[offset..offset + len])
    }

    fn read<const SIZE: usize>(&self, addr: PhysicalAddress) -> BusResult<[u8; SIZE]> {
        let mut value = [0; SIZE];
        value.copy_from_slice(self.bytes(addr, SIZE)?);
        Ok(value)
    }
}

impl Bus for FlatMemory {
    fn read_u8(&mut self, addr: PhysicalAddress) -> BusResult<u8> {
        self.read(addr).map(u8::from_le_bytes)
    }

    fn read_u16(&mut self, addr: PhysicalAddress) -> BusResult<u16> {
        self.read(addr).map(u16::from_le_bytes)
    }

    fn read_u32(&mut self, addr: PhysicalAddress) -> BusResult<u32> {
        self.read(addr).map(u32::from_le_bytes)
    }

    fn write_u8(&mut self, addr: PhysicalAddress, value: u8) -> BusResult<()> {
        self.load(addr, &value.to_le_bytes())
    }

    fn write_u16(&mut self, addr: PhysicalAddress, value: u16) -> BusResult<()> {
        self.load(addr, &value.to_le_bytes())
    }

    fn write_u32(&mut self, addr: PhysicalAddress, value: u32) -> BusResult<()> {
        self.load(addr, &value.to_le_bytes())
    }

    fn fast_regions(&mut self) -> Vec<FastRegion> {
        let region = u32::try_from(self.data.len()).ok().and_then(|len| {
            Some(FastRegion {
                start: self.base,
                len,
                ptr: NonNull::new(self.data.as_mut_ptr())?,
            })
        });
        region.into_iter().collect()
    }
}
