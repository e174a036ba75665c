//! Allocation-free tokenizer for a single line of delimiter-separated fields.
//!
//! A [`ByteArrayScanner`] borrows the line it scans and only ever hands out sub-slices of it, so
//! scanning a line costs nothing beyond a few stack words. Fields are separated by exactly one
//! delimiter byte: two adjacent delimiters produce an empty token, which keeps field positions
//! aligned with the kernel's output.

use super::error::{Result, ScanError};

/// Cursor over the delimiter-separated tokens of one line.
///
/// The scanner can only be built from a line and a delimiter, so it is never observed in an
/// uninitialised state.
#[derive(Debug, Clone)]
pub struct ByteArrayScanner<'a> {
    data: &'a [u8],
    offset: usize,
    delimiter: u8,
}

impl<'a> ByteArrayScanner<'a> {
    pub fn new(data: &'a [u8], delimiter: u8) -> Self {
        Self {
            data,
            offset: 0,
            delimiter,
        }
    }

    /// Returns the next raw token.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::NoSuchElement`] once the whole line has been consumed.
    pub fn next_token(&mut self) -> Result<&'a [u8]> {
        if self.offset >= self.data.len() {
            return Err(ScanError::NoSuchElement {
                offset: self.offset,
            });
        }
        let start = self.offset;
        let rest = &self.data[start..];
        match rest.iter().position(|&b| b == self.delimiter) {
            Some(len) => {
                self.offset = start + len + 1;
                Ok(&rest[..len])
            }
            None => {
                self.offset = self.data.len();
                Ok(rest)
            }
        }
    }

    /// Moves past the next token.
    pub fn skip(&mut self) -> Result<()> {
        self.next_token().map(|_| ())
    }

    /// Consumes the next token and reports whether it equals `s` byte for byte.
    pub fn next_str_equals(&mut self, s: &str) -> Result<bool> {
        Ok(self.next_token()? == s.as_bytes())
    }

    /// Consumes the next token and parses it as an unsigned decimal integer.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidNumber`] for empty tokens, non-digit bytes and values that do
    /// not fit in a `u64`. The reported offset is where the token starts.
    pub fn next_u64(&mut self) -> Result<u64> {
        let start = self.offset;
        let token = self.next_token()?;
        parse_u64(token).ok_or(ScanError::InvalidNumber { offset: start })
    }

    /// Returns `true` when every token has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.data.len()
    }
}

fn parse_u64(token: &[u8]) -> Option<u64> {
    if token.is_empty() {
        return None;
    }
    token.iter().try_fold(0u64, |acc, &b| {
        let digit = b.checked_sub(b'0').filter(|d| *d <= 9)?;
        acc.checked_mul(10)?.checked_add(u64::from(digit))
    })
}
