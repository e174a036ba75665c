//! Per-uid received-byte accounting from `/proc/net/xt_qtaguid/stats`.
//!
//! The file starts with a header line followed by one space-separated record per
//! (interface, tag, uid, counter set):
//!
//! ```text
//! idx iface acct_tag_hex uid_tag_int cnt_set rx_bytes rx_packets tx_bytes tx_packets ...
//! 2 wlan0 0x0 10237 0 4096 12 1024 9 ...
//! ```
//!
//! Only `iface` (to drop loopback traffic), `uid_tag_int` and `rx_bytes` are read. A uid shows
//! up once per counter set, so all matching rows are summed.

use std::io::{self, Read};
use std::mem;
use std::path::{Path, PathBuf};

use crate::error::ResultOkLogExt;
use crate::fsutil;

use super::error::{ReadError, Result};
use super::reader::{DEFAULT_BUFFER_SIZE, LineBufferReader};
use super::scanner::ByteArrayScanner;

/// Location of the kernel's per-uid traffic accounting.
pub const QTAGUID_UID_STATS: &str = "/proc/net/xt_qtaguid/stats";

const LOOPBACK_INTERFACE: &str = "lo";
const FIELD_DELIMITER: u8 = b' ';

/// Stateful reader of the qtaguid stats file that reports received-byte deltas.
///
/// The block and line buffers are allocated once and reused by every scan.
#[derive(Debug)]
pub struct QTagParser {
    path: PathBuf,
    block: Vec<u8>,
    line: Vec<u8>,
    previous_bytes: Option<u64>,
}

impl Default for QTagParser {
    fn default() -> Self {
        Self::new(QTAGUID_UID_STATS)
    }
}

impl QTagParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block: vec![0; DEFAULT_BUFFER_SIZE],
            line: vec![0; DEFAULT_BUFFER_SIZE],
            previous_bytes: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stats file and returns the bytes received by `uid` since the previous call.
    ///
    /// Returns `None` if the file cannot be read (the error is logged), and on the first
    /// successful read after construction or [`reset_baseline`](Self::reset_baseline), since
    /// there is nothing to diff against yet. Counters that went backwards yield a delta of `0`.
    pub fn parse_data_usage_for_uid(&mut self, uid: u32) -> Option<u64> {
        self.read_data_usage_for_uid(uid).ok_log().flatten()
    }

    /// Like [`parse_data_usage_for_uid`](Self::parse_data_usage_for_uid), but tells a failed
    /// read apart from a freshly established baseline.
    ///
    /// # Errors
    ///
    /// Returns a [`ReadError`] if the file cannot be opened or read. The baseline is left as it
    /// was.
    pub fn read_data_usage_for_uid(
        &mut self,
        uid: u32,
    ) -> std::result::Result<Option<u64>, ReadError> {
        let file = fsutil::open_file(&self.path)?;
        let total = self
            .sum_rx_bytes(file, uid)
            .map_err(|source| ReadError::Read {
                path: self.path.clone(),
                source,
            })?;
        Ok(self.update_baseline(total))
    }

    /// Forgets the previous total so the next read starts a fresh baseline.
    pub fn reset_baseline(&mut self) {
        self.previous_bytes = None;
    }

    /// Sums `rx_bytes` over all non-loopback rows owned by `uid`.
    ///
    /// Malformed lines are logged and skipped.
    ///
    /// # Errors
    ///
    /// Only I/O errors from `source` are returned.
    pub fn sum_rx_bytes<R: Read>(&mut self, source: R, uid: u32) -> io::Result<u64> {
        let mut reader = LineBufferReader::with_buffer(source, mem::take(&mut self.block));
        let result = scan_rx_bytes(&mut reader, &mut self.line, uid);
        self.block = reader.into_buffer();
        result
    }

    fn update_baseline(&mut self, total: u64) -> Option<u64> {
        let previous = self.previous_bytes.replace(total)?;
        Some(total.saturating_sub(previous))
    }
}

fn scan_rx_bytes<R: Read>(
    reader: &mut LineBufferReader<R>,
    line: &mut [u8],
    uid: u32,
) -> io::Result<u64> {
    let mut total = 0u64;
    // header
    reader.skip_line()?;

    let mut lineno = 1;
    while let Some(len) = reader.read_line(line)? {
        lineno += 1;
        if reader.last_line_truncated() {
            log::warn!("line {} exceeds {} bytes, skipping", lineno, line.len());
            continue;
        }
        match parse_rx_bytes(&line[..len], uid) {
            Ok(Some(rx_bytes)) => total = total.saturating_add(rx_bytes),
            Ok(None) => {}
            Err(err) => log::warn!("skipping malformed line {}: {}", lineno, err),
        }
    }

    Ok(total)
}

/// Returns the line's `rx_bytes` if it belongs to `uid` on a non-loopback interface.
fn parse_rx_bytes(line: &[u8], uid: u32) -> Result<Option<u64>> {
    let mut scanner = ByteArrayScanner::new(line, FIELD_DELIMITER);
    // idx
    scanner.skip()?;
    if scanner.next_str_equals(LOOPBACK_INTERFACE)? {
        return Ok(None);
    }
    // acct_tag_hex
    scanner.skip()?;
    if scanner.next_u64()? != u64::from(uid) {
        return Ok(None);
    }
    // cnt_set
    scanner.skip()?;
    scanner.next_u64().map(Some)
}

/// A [`QTagParser`] bound to one uid.
#[derive(Debug)]
pub struct QTagUidSource {
    parser: QTagParser,
    uid: u32,
}

impl QTagUidSource {
    pub fn new(parser: QTagParser, uid: u32) -> Self {
        Self { parser, uid }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Bytes received by the uid since the previous call. See
    /// [`QTagParser::read_data_usage_for_uid`].
    ///
    /// # Errors
    ///
    /// Returns a [`ReadError`] if the stats file cannot be read.
    pub fn sample_byte_delta(&mut self) -> std::result::Result<Option<u64>, ReadError> {
        self.parser.read_data_usage_for_uid(self.uid)
    }

    pub fn reset_baseline(&mut self) {
        self.parser.reset_baseline();
    }
}
