//! Received-byte accounting from the kernel's `xt_qtaguid` module.
//!
//! Parsing is split into three layers so that the once-per-second scan never touches the
//! allocator:
//!
//! - [`LineBufferReader`] re-segments fixed-size reads into lines.
//! - [`ByteArrayScanner`] tokenizes one line in place.
//! - [`QTagParser`] ties both together, filters rows by uid and tracks the byte baseline.
//!
//! # Example
//!
//! ```rust
//! use connclass::qtaguid::QTagParser;
//!
//! let data = "\
//! idx iface acct_tag_hex uid_tag_int cnt_set rx_bytes rx_packets
//! 2 wlan0 0x0 10237 0 4096 12
//! 3 lo 0x0 10237 0 8192 20
//! 4 wlan0 0x0 10237 1 1024 3
//! ";
//! let mut parser = QTagParser::new("/proc/net/xt_qtaguid/stats");
//! let total = parser.sum_rx_bytes(data.as_bytes(), 10237).unwrap();
//! assert_eq!(total, 5120);
//! ```
mod error;
mod parser;
mod reader;
mod scanner;

pub use error::{ReadError, ScanError};
pub use parser::{QTAGUID_UID_STATS, QTagParser, QTagUidSource};
pub use reader::{DEFAULT_BUFFER_SIZE, LineBufferReader};
pub use scanner::ByteArrayScanner;
