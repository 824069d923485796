//! Strict UTF-8 transfer between views and Rust strings.

use rawmem_common::{Result, error::Error};

use crate::memory::{Memory, WritableMemory};

impl Memory {
    /// Decodes `utf8_len` bytes starting at `offset` and appends the characters to `dst`.
    ///
    /// Returns the number of characters appended. The range is checked before decoding;
    /// overlong forms, encoded surrogates, code points above `U+10FFFF`, truncated
    /// sequences and stray continuation bytes fail with `MalformedEncoding`, and `dst`
    /// is left untouched.
    pub fn get_utf8(&self, offset: u64, utf8_len: u64, dst: &mut String) -> Result<usize> {
        self.state.check_valid_and_bounds(offset, utf8_len)?;
        let bytes = unsafe {
            std::slice::from_raw_parts(self.state.address(offset), utf8_len as usize)
        };
        let text = std::str::from_utf8(bytes).map_err(|e| {
            let message = match e.error_len() {
                Some(len) => format!("invalid {len}-byte sequence"),
                None => "truncated sequence".to_string(),
            };
            Error::malformed_encoding(offset + e.valid_up_to() as u64, message)
        })?;
        dst.push_str(text);
        Ok(text.chars().count())
    }
}

impl WritableMemory {
    /// Encodes `src` at `offset`. Returns the number of bytes written.
    ///
    /// Nothing is written if the encoded form does not fit.
    pub fn put_utf8(&mut self, offset: u64, src: &str) -> Result<usize> {
        self.put_array::<u8>(offset, src.as_bytes())?;
        Ok(src.len())
    }

    /// Encodes UTF-16 code units at `offset`. Returns the number of bytes written.
    ///
    /// The whole input is validated and measured first: an unpaired surrogate fails with
    /// `UnpairedSurrogate` and an encoded form that does not fit fails with `OutOfRange`,
    /// in both cases before any byte is written.
    pub fn put_utf8_utf16(&mut self, offset: u64, src: &[u16]) -> Result<usize> {
        let mut utf8_len = 0usize;
        let mut index = 0usize;
        for c in char::decode_utf16(src.iter().copied()) {
            match c {
                Ok(c) => {
                    utf8_len += c.len_utf8();
                    index += c.len_utf16();
                }
                Err(e) => return Err(Error::unpaired_surrogate(index, e.unpaired_surrogate())),
            }
        }
        self.state.check_valid_and_bounds(offset, utf8_len as u64)?;

        let dst = unsafe {
            std::slice::from_raw_parts_mut(self.state.address(offset), utf8_len)
        };
        let mut pos = 0;
        for c in char::decode_utf16(src.iter().copied()).flatten() {
            pos += c.encode_utf8(&mut dst[pos..]).len();
        }
        debug_assert_eq!(pos, utf8_len);
        Ok(utf8_len)
    }
}
