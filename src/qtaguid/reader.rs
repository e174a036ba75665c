//! Block-buffered line reader with caller-owned buffers.
//!
//! [`LineBufferReader`] pulls fixed-size blocks from any [`Read`] source and re-segments them
//! into `\n`-terminated lines, copying each line into a slice supplied by the caller. Neither
//! reading nor skipping allocates: the block buffer is handed in at construction and can be
//! taken back with [`LineBufferReader::into_buffer`] to be reused for the next source.

use std::io::{self, Read};

/// Default size of the block and line buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Reads lines from `R` through a reusable block buffer.
#[derive(Debug)]
pub struct LineBufferReader<R> {
    source: R,
    block: Vec<u8>,
    pos: usize,
    filled: usize,
    eof: bool,
    truncated: bool,
}

impl<R: Read> LineBufferReader<R> {
    /// Creates a reader with a freshly allocated block buffer of [`DEFAULT_BUFFER_SIZE`] bytes.
    pub fn new(source: R) -> Self {
        Self::with_buffer(source, vec![0; DEFAULT_BUFFER_SIZE])
    }

    /// Creates a reader that uses `block` as its block buffer.
    ///
    /// The buffer's current length is its capacity for a single read; an empty buffer is grown
    /// to [`DEFAULT_BUFFER_SIZE`].
    pub fn with_buffer(source: R, mut block: Vec<u8>) -> Self {
        if block.is_empty() {
            block.resize(DEFAULT_BUFFER_SIZE, 0);
        }
        Self {
            source,
            block,
            pos: 0,
            filled: 0,
            eof: false,
            truncated: false,
        }
    }

    /// Gives the block buffer back so it can be reused with another source.
    pub fn into_buffer(self) -> Vec<u8> {
        self.block
    }

    /// Whether the most recent [`read_line`](Self::read_line) had to drop bytes because the
    /// line did not fit into the caller's buffer.
    pub fn last_line_truncated(&self) -> bool {
        self.truncated
    }

    /// Copies the next line, without its terminating `\n`, into `line`.
    ///
    /// Returns `Ok(None)` at end of stream and `Ok(Some(len))` otherwise, so an empty line is
    /// `Some(0)`. A final line without a trailing newline is still returned. Bytes beyond
    /// `line.len()` are discarded up to the end of the line and reported through
    /// [`last_line_truncated`](Self::last_line_truncated).
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the underlying source.
    pub fn read_line(&mut self, line: &mut [u8]) -> io::Result<Option<usize>> {
        self.truncated = false;
        let mut len = 0;
        let mut consumed_any = false;

        while self.fill_block()? {
            consumed_any = true;
            let available = &self.block[self.pos..self.filled];
            let newline = available.iter().position(|&b| b == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];

            let n = chunk.len().min(line.len() - len);
            line[len..len + n].copy_from_slice(&chunk[..n]);
            len += n;
            if n < chunk.len() {
                self.truncated = true;
            }

            match newline {
                Some(i) => {
                    self.pos += i + 1;
                    return Ok(Some(len));
                }
                None => self.pos = self.filled,
            }
        }

        Ok(consumed_any.then_some(len))
    }

    /// Moves past the next line.
    ///
    /// Returns `Ok(false)` if the stream was already exhausted.
    pub fn skip_line(&mut self) -> io::Result<bool> {
        let mut consumed_any = false;
        while self.fill_block()? {
            consumed_any = true;
            let available = &self.block[self.pos..self.filled];
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    self.pos += i + 1;
                    return Ok(true);
                }
                None => self.pos = self.filled,
            }
        }
        Ok(consumed_any)
    }

    /// Ensures unread bytes are buffered. Returns `false` at end of stream.
    fn fill_block(&mut self) -> io::Result<bool> {
        if self.pos < self.filled {
            return Ok(true);
        }
        if self.eof {
            return Ok(false);
        }
        loop {
            match self.source.read(&mut self.block) {
                Ok(0) => {
                    self.eof = true;
                    self.pos = 0;
                    self.filled = 0;
                    return Ok(false);
                }
                Ok(n) => {
                    self.pos = 0;
                    self.filled = n;
                    return Ok(true);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}
