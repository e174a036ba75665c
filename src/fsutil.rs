use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// A stats or config file that could not be opened, together with its path.
#[derive(Debug, thiserror::Error)]
#[error("cannot open `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FileOpenError {
    /// Whether the file simply does not exist, as on kernels built without `xt_qtaguid`.
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }
}

/// Opens `path` for a single unbuffered scan.
///
/// Pseudo-files such as `/proc/net/xt_qtaguid/stats` are regenerated on every open, so callers
/// open them fresh for each reading and read through their own block buffer.
///
/// # Errors
///
/// Returns a [`FileOpenError`] carrying `path` if the open fails.
///
/// ```no_run
/// # use connclass::fsutil;
/// match fsutil::open_file("/proc/net/xt_qtaguid/stats") {
///     Ok(_stats) => {}
///     Err(err) if err.is_not_found() => eprintln!("kernel has no per-uid accounting"),
///     Err(err) => return Err(err),
/// }
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file(path: impl AsRef<Path>) -> Result<File, FileOpenError> {
    let path = path.as_ref();
    File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn test_reads_stats_file_unbuffered() {
        let mut stats = tempfile::NamedTempFile::new().unwrap();
        stats.write_all(b"idx iface acct_tag_hex uid_tag_int cnt_set rx_bytes\n").unwrap();

        let mut file = open_file(stats.path()).unwrap();
        let mut block = [0u8; 16];
        let n = file.read(&mut block).unwrap();
        assert_eq!(&block[..n], b"idx iface acct_t");
    }

    #[test]
    fn test_missing_accounting_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xt_qtaguid").join("stats");

        let err = open_file(&path).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.path, path);
        assert_eq!(
            err.to_string(),
            format!("cannot open `{}`: {}", path.display(), err.source)
        );
    }
}
