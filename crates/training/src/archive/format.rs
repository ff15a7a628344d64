//! Wire-format constants and the checked byte reader.

use bytes::{Buf, BufMut};

use crate::error::ArchiveError;

/// Magic word at the head of every training archive.
pub const ARCHIVE_MAGIC: u32 = 0x4C59_5254;

/// Current layout version.
pub const ARCHIVE_VERSION: u32 = 1;

/// Record tags in the record section.
pub(crate) const TAG_KLASS: u8 = 0;
pub(crate) const TAG_METHOD: u8 = 1;
pub(crate) const TAG_COMPILE: u8 = 2;

/// Sentinel for "no value" in u32-encoded optional fields.
pub(crate) const NONE_U32: u32 = u32::MAX;

/// Write an optional u32 using the [`NONE_U32`] sentinel.
pub(crate) fn put_opt_u32(buf: &mut impl BufMut, value: Option<u32>) {
    buf.put_u32_le(value.unwrap_or(NONE_U32));
}

/// Write a u32-length-prefixed list of u32 indices.
pub(crate) fn put_index_list(buf: &mut impl BufMut, list: &[u32]) {
    buf.put_u32_le(list.len() as u32);
    for &index in list {
        buf.put_u32_le(index);
    }
}

/// Cursor over an archive buffer; every read is bounds-checked and
/// failures carry how much was missing.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, needed: usize) -> Result<(), ArchiveError> {
        if self.buf.remaining() < needed {
            return Err(ArchiveError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ArchiveError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ArchiveError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ArchiveError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn u64(&mut self) -> Result<u64, ArchiveError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub(crate) fn opt_u32(&mut self) -> Result<Option<u32>, ArchiveError> {
        let raw = self.u32()?;
        Ok((raw != NONE_U32).then_some(raw))
    }

    /// Read a u32-length-prefixed list of u32 indices, each validated
    /// against `bound`.
    pub(crate) fn index_list(&mut self, bound: u32) -> Result<Vec<u32>, ArchiveError> {
        let len = self.u32()? as usize;
        let mut list = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            list.push(self.bounded_u32(bound)?);
        }
        Ok(list)
    }

    /// Read a u32 index that must be `< bound`.
    pub(crate) fn bounded_u32(&mut self, bound: u32) -> Result<u32, ArchiveError> {
        let raw = self.u32()?;
        if raw >= bound {
            return Err(ArchiveError::Corrupt(format!(
                "index {raw} out of range (bound {bound})"
            )));
        }
        Ok(raw)
    }

    /// Read a u16-length-prefixed UTF-8 string.
    pub(crate) fn string(&mut self) -> Result<String, ArchiveError> {
        let len = self.u16()? as usize;
        self.ensure(len)?;
        let bytes = self.buf[..len].to_vec();
        self.buf.advance(len);
        String::from_utf8(bytes)
            .map_err(|e| ArchiveError::Corrupt(format!("invalid symbol text: {e}")))
    }
}
