//! Little-endian primitives shared by the block encodings.

// Lengths written here are bounded by u32 / u16 by construction.
#![allow(clippy::cast_possible_truncation)]

use crate::tree::node::NodeError;

/// Append-only byte buffer with length-prefixed writes.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub(crate) fn with_tag(tag: u8) -> Self {
        Self { bytes: vec![tag] }
    }

    pub(crate) fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub(crate) fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Write `bytes` prefixed with a u32 length.
    pub(crate) fn bytes(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.bytes.extend_from_slice(bytes);
    }

    /// Write a string prefixed with a u16 length.
    pub(crate) fn short_str(&mut self, value: &str) {
        self.bytes.extend_from_slice(&(value.len() as u16).to_le_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
    }

    pub(crate) fn optional_u64(&mut self, value: Option<u64>) {
        match value {
            Some(v) => {
                self.u8(1);
                self.u64(v);
            }
            None => self.u8(0),
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Cursor over an encoded block.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub(crate) const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], NodeError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(NodeError::Truncated)?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, NodeError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, NodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, NodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, NodeError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub(crate) fn bytes(&mut self) -> Result<Vec<u8>, NodeError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub(crate) fn short_str(&mut self) -> Result<String, NodeError> {
        let len = usize::from(self.u16()?);
        String::from_utf8(self.take(len)?.to_vec()).map_err(|_| NodeError::InvalidUtf8)
    }

    pub(crate) fn optional_u64(&mut self) -> Result<Option<u64>, NodeError> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.u64()?)),
            other => Err(NodeError::InvalidFlag(other)),
        }
    }

    /// Number of entries announced by a u32 count, sanity-checked against the
    /// bytes left so a corrupt count can't trigger a huge allocation.
    pub(crate) fn count(&mut self, min_entry_size: usize) -> Result<usize, NodeError> {
        let count = self.u32()? as usize;
        if count.saturating_mul(min_entry_size) > self.remaining() {
            return Err(NodeError::Truncated);
        }
        Ok(count)
    }

    pub(crate) const fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Fail if any bytes are left unread.
    pub(crate) const fn finish(&self) -> Result<(), NodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(NodeError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_detects_truncation() {
        let mut writer = Writer::with_tag(7);
        writer.bytes(b"hello");
        let bytes = writer.finish();

        let mut reader = Reader::new(&bytes[..bytes.len() - 1]);
        assert_eq!(reader.u8(), Ok(7));
        assert_eq!(reader.bytes(), Err(NodeError::Truncated));
    }

    #[test]
    fn test_reader_rejects_trailing_bytes() {
        let bytes = [1u8, 2, 3];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.u8(), Ok(1));
        assert_eq!(reader.finish(), Err(NodeError::TrailingBytes(2)));
    }

    #[test]
    fn test_count_rejects_impossible_sizes() {
        let mut writer = Writer::default();
        writer.u32(u32::MAX);
        let bytes = writer.finish();
        assert_eq!(Reader::new(&bytes).count(8), Err(NodeError::Truncated));
    }
}
