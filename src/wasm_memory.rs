use std::ops::Range;

use crate::error::{Error, OOB_MEMORY_ACCESS};
use crate::types::Limits;

const OOB: Error = Error::Trap(OOB_MEMORY_ACCESS);

macro_rules! impl_access {
    ($type:ty, $load_name:ident, $store_name:ident) => {
        #[inline(always)]
        pub fn $load_name(&self, ptr: u32, offset: u32) -> Result<$type, Error> {
            const N: usize = std::mem::size_of::<$type>();
            let range = Self::effective(ptr, offset, N).ok_or(OOB)?;
            let bytes = self.data.get(range).ok_or(OOB)?;
            let mut buf = [0u8; N];
            buf.copy_from_slice(bytes);
            Ok(<$type>::from_le_bytes(buf))
        }
        #[inline(always)]
        pub fn $store_name(&mut self, ptr: u32, offset: u32, v: $type) -> Result<(), Error> {
            const N: usize = std::mem::size_of::<$type>();
            let range = Self::effective(ptr, offset, N).ok_or(OOB)?;
            let bytes = self.data.get_mut(range).ok_or(OOB)?;
            bytes.copy_from_slice(&v.to_le_bytes());
            Ok(())
        }
    };
}

/// A linear memory. Its byte length is always `size() * PAGE_SIZE`.
#[derive(Debug, Clone)]
pub struct WasmMemory {
    data: Vec<u8>,
    current: u32,
    maximum: u32,
    declared_max: Option<u32>,
}

impl WasmMemory {
    pub const MAX_PAGES: u32 = 65536;
    pub const PAGE_SIZE: u32 = 65536;

    pub fn new(limits: Limits) -> Self {
        let maximum = limits.max.unwrap_or(Self::MAX_PAGES).min(Self::MAX_PAGES);
        let data = vec![0; (limits.min as usize) * (Self::PAGE_SIZE as usize)];
        Self { data, current: limits.min, maximum, declared_max: limits.max }
    }

    pub fn size(&self) -> u32 { self.current }
    pub fn max(&self) -> u32 { self.maximum }

    /// Current limits, as checked against an importer's declaration.
    pub fn limits(&self) -> Limits { Limits { min: self.current, max: self.declared_max } }

    pub fn bytes(&self) -> &[u8] { &self.data }

    /// Grows by `delta` pages, returning the old size or `u32::MAX` (-1) if
    /// the maximum would be exceeded.
    pub fn grow(&mut self, delta: u32) -> u32 {
        if delta == 0 { return self.current; }
        if delta > self.maximum.saturating_sub(self.current) { return u32::MAX; }
        let old = self.current;
        self.current += delta;
        self.data.resize((self.current as usize) * (Self::PAGE_SIZE as usize), 0);
        old
    }

    #[inline(always)]
    fn effective(ptr: u32, offset: u32, width: usize) -> Option<Range<usize>> {
        let start = (ptr as usize).checked_add(offset as usize)?;
        Some(start..start.checked_add(width)?)
    }

    #[inline(always)]
    fn range(&self, start: u32, len: u32) -> Result<Range<usize>, Error> {
        let start = start as usize;
        let end = start.checked_add(len as usize).ok_or(OOB)?;
        if end > self.data.len() { return Err(OOB); }
        Ok(start..end)
    }

    impl_access!(u8, load_u8, store_u8);
    impl_access!(u16, load_u16, store_u16);
    impl_access!(u32, load_u32, store_u32);
    impl_access!(u64, load_u64, store_u64);
    impl_access!(i8, load_i8, store_i8);
    impl_access!(i16, load_i16, store_i16);
    impl_access!(i32, load_i32, store_i32);
    impl_access!(i64, load_i64, store_i64);

    #[inline(always)]
    pub fn load_f32(&self, ptr: u32, offset: u32) -> Result<f32, Error> {
        Ok(f32::from_bits(self.load_u32(ptr, offset)?))
    }
    #[inline(always)]
    pub fn store_f32(&mut self, ptr: u32, offset: u32, v: f32) -> Result<(), Error> {
        self.store_u32(ptr, offset, v.to_bits())
    }
    #[inline(always)]
    pub fn load_f64(&self, ptr: u32, offset: u32) -> Result<f64, Error> {
        Ok(f64::from_bits(self.load_u64(ptr, offset)?))
    }
    #[inline(always)]
    pub fn store_f64(&mut self, ptr: u32, offset: u32, v: f64) -> Result<(), Error> {
        self.store_u64(ptr, offset, v.to_bits())
    }

    pub fn read_bytes(&self, offset: u32, len: u32) -> Result<&[u8], Error> {
        let range = self.range(offset, len)?;
        Ok(&self.data[range])
    }

    pub fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        let len = u32::try_from(bytes.len()).map_err(|_| OOB)?;
        let range = self.range(offset, len)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn fill(&mut self, offset: u32, value: u8, len: u32) -> Result<(), Error> {
        let range = self.range(offset, len)?;
        self.data[range].fill(value);
        Ok(())
    }

    /// `memory.copy`; the ranges may overlap.
    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), Error> {
        let src = self.range(src, len)?;
        let dst = self.range(dst, len)?;
        self.data.copy_within(src, dst.start);
        Ok(())
    }
}
