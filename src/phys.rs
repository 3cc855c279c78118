//! Byte-level access to physical memory.

/// Physical memory as seen by the shim.
///
/// Implementations must not cache: every read goes to the bus, so writes that
/// the hardware silently drops (write-protected shadow RAM) read back as the
/// old value.
pub trait PhysMemory {
    fn read_u8(&self, addr: u64) -> u8;
    fn write_u8(&mut self, addr: u64, value: u8);

    fn read_u16(&self, addr: u64) -> u16 {
        u16::from_le_bytes([self.read_u8(addr), self.read_u8(addr + 1)])
    }

    fn write_u16(&mut self, addr: u64, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_u8(addr, lo);
        self.write_u8(addr + 1, hi);
    }

    fn read_bytes(&self, addr: u64, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_u8(addr + i as u64);
        }
    }

    fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write_u8(addr + i as u64, b);
        }
    }

    fn fill(&mut self, addr: u64, len: u64, value: u8) {
        for i in 0..len {
            self.write_u8(addr + i, value);
        }
    }
}

/// Real-mode `segment:offset` pointer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct FarPtr {
    pub segment: u16,
    pub offset: u16,
}

impl FarPtr {
    pub const fn new(segment: u16, offset: u16) -> Self {
        Self { segment, offset }
    }

    /// `segment` is `base >> 4`, `offset` is whatever is left to reach `linear`.
    ///
    /// `base` must lie in the first MiB and `linear - (base & !0xF)` must fit
    /// in 16 bits.
    pub const fn within(base: u64, linear: u64) -> Self {
        let segment = (base >> 4) as u16;
        Self {
            segment,
            offset: (linear - ((segment as u64) << 4)) as u16,
        }
    }

    #[inline]
    pub const fn linear(&self) -> u64 {
        ((self.segment as u64) << 4) + self.offset as u64
    }

    /// Memory layout of a far pointer: offset in the low word, segment in the high word.
    #[inline]
    pub const fn packed(&self) -> u32 {
        (self.segment as u32) << 16 | self.offset as u32
    }

    #[inline]
    pub const fn from_packed(raw: u32) -> Self {
        Self {
            segment: (raw >> 16) as u16,
            offset: raw as u16,
        }
    }
}

impl core::fmt::Display for FarPtr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.segment, self.offset)
    }
}
