//! Field encoding shared by the controller and uploader.
//!
//! Variable-length text fields are UTF-8 followed by a single NUL byte, so
//! several of them can share one packet. Replies are walked with [`Fields`].

use crate::error::{DeviceError, Result};

/// Append `value` and its NUL terminator to `buf`.
///
/// Fails if `value` itself contains a NUL, which would split the field.
pub fn put_str(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    if value.as_bytes().contains(&0) {
        return Err(DeviceError::InvalidArgument(format!(
            "{value:?} contains a NUL byte"
        )));
    }
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
    Ok(())
}

/// Cursor over a reply payload.
#[derive(Debug)]
pub struct Fields<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Bytes not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let rest = self.rest();
        if rest.len() < len {
            return Err(DeviceError::MalformedReply(format!(
                "need {len} bytes at offset {}, have {}",
                self.pos,
                rest.len()
            )));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    /// Read a NUL-terminated string.
    pub fn str(&mut self) -> Result<String> {
        let rest = self.rest();
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            DeviceError::MalformedReply(format!("unterminated string at offset {}", self.pos))
        })?;
        self.pos += end + 1;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }
}
