//! Dedup ledger: every identifier ever probed, persisted append-only
//!
//! File format: UTF-8 text, one identifier per line, in append order. A
//! final line without a trailing newline is a torn write from a crash; it is
//! dropped and truncated away when the ledger is opened.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{ProbeError, Result};

/// Append target behind the ledger
trait LedgerLog: Write + Send {
    /// Cut the log back to `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn sync(&self) -> io::Result<()>;
}

impl LedgerLog for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

struct LedgerInner {
    seen: HashSet<String>,
    log: Box<dyn LedgerLog>,
    /// Log length up to the last complete line
    end: u64,
    /// A failed append could not be rolled back; the log tail is torn
    poisoned: bool,
}

/// Atomic check-and-insert set backed by an append-only log
pub struct DedupLedger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
}

impl DedupLedger {
    /// Open (or create) the ledger and replay it fully into memory
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProbeError::persistence(e.to_string(), Some(parent.to_string_lossy().to_string()))
            })?;
        }

        let (seen, end) = replay(path)?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                ProbeError::persistence(e.to_string(), Some(path.to_string_lossy().to_string()))
            })?;

        tracing::info!(
            path = %path.display(),
            identifiers = seen.len(),
            "Dedup ledger replayed"
        );

        Ok(Self::with_log(path, seen, end, Box::new(log)))
    }

    fn with_log(path: &Path, seen: HashSet<String>, end: u64, log: Box<dyn LedgerLog>) -> Self {
        Self {
            path: path.to_path_buf(),
            inner: Mutex::new(LedgerInner {
                seen,
                log,
                end,
                poisoned: false,
            }),
        }
    }

    /// Claim an identifier for probing.
    ///
    /// Returns `Ok(true)` for exactly one caller per identifier, ever.
    /// The claim only becomes visible after the log write succeeded. On a
    /// write error any partial line is cut off again and the identifier
    /// stays claimable. If that cut fails too, the ledger refuses every
    /// further claim until it is reopened, which drops the torn tail.
    pub fn try_claim(&self, identifier: &str) -> Result<bool> {
        if identifier.is_empty() || identifier.contains('\n') || identifier.contains('\r') {
            return Err(ProbeError::validation(format!(
                "Identifier cannot be stored in the ledger: {:?}",
                identifier
            )));
        }

        let mut inner = self.inner.lock();
        if inner.poisoned {
            return Err(ProbeError::persistence(
                "Ledger has a torn final line and must be reopened",
                Some(self.path.to_string_lossy().to_string()),
            ));
        }
        if inner.seen.contains(identifier) {
            return Ok(false);
        }

        let line = format!("{}\n", identifier);
        if let Err(e) = inner.log.write_all(line.as_bytes()).and_then(|_| inner.log.flush()) {
            let end = inner.end;
            if let Err(rollback) = inner.log.truncate(end) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Could not cut partial ledger line, refusing further claims"
                );
                inner.poisoned = true;
            }
            return Err(ProbeError::persistence(
                format!("Failed to append to ledger: {}", e),
                Some(self.path.to_string_lossy().to_string()),
            ));
        }

        inner.end += line.len() as u64;
        inner.seen.insert(identifier.to_string());
        Ok(true)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.inner.lock().seen.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force appended lines to stable storage
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.log.sync().map_err(|e| {
            ProbeError::persistence(e.to_string(), Some(self.path.to_string_lossy().to_string()))
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every complete line of the log, truncating a torn final line.
/// Also returns the byte length of the kept lines.
fn replay(path: &Path) -> Result<(HashSet<String>, u64)> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((HashSet::new(), 0)),
        Err(e) => {
            return Err(ProbeError::persistence(
                e.to_string(),
                Some(path.to_string_lossy().to_string()),
            ))
        }
    };

    let complete = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|idx| idx + 1)
        .unwrap_or(0);

    if complete < bytes.len() {
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = bytes.len() - complete,
            "Dropping partial final ledger line"
        );
        let file = OpenOptions::new().write(true).open(path).map_err(|e| {
            ProbeError::persistence(e.to_string(), Some(path.to_string_lossy().to_string()))
        })?;
        file.set_len(complete as u64).map_err(|e| {
            ProbeError::persistence(e.to_string(), Some(path.to_string_lossy().to_string()))
        })?;
    }

    let seen = String::from_utf8_lossy(&bytes[..complete])
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    Ok((seen, complete as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_claim_twice() {
        let dir = TempDir::new().unwrap();
        let ledger = DedupLedger::open(&dir.path().join("ledger.txt")).unwrap();
        assert!(ledger.try_claim("https://x/abcd").unwrap());
        assert!(!ledger.try_claim("https://x/abcd").unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(DedupLedger::open(&dir.path().join("ledger.txt")).unwrap());

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let ledger = Arc::clone(&ledger);
                    scope.spawn(move || ledger.try_claim("https://x/abcd").unwrap() as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(winners, 1);
    }

    #[test]
    fn test_replay_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.txt");
        {
            let ledger = DedupLedger::open(&path).unwrap();
            assert!(ledger.try_claim("https://x/a").unwrap());
            assert!(ledger.try_claim("https://x/b").unwrap());
        }

        let ledger = DedupLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(!ledger.try_claim("https://x/a").unwrap());
        assert!(ledger.try_claim("https://x/c").unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "https://x/a\nhttps://x/b\nhttps://x/c\n");
    }

    #[test]
    fn test_partial_final_line_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.txt");
        std::fs::write(&path, "https://x/a\nhttps://x/b\nhttps://x/tor").unwrap();

        let ledger = DedupLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(!ledger.contains("https://x/tor"));
        assert!(ledger.try_claim("https://x/torn").unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "https://x/a\nhttps://x/b\nhttps://x/torn\n");
    }

    #[test]
    fn test_rejects_multiline_identifier() {
        let dir = TempDir::new().unwrap();
        let ledger = DedupLedger::open(&dir.path().join("ledger.txt")).unwrap();
        assert!(ledger.try_claim("https://x/a\nhttps://x/b").is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_emoji_identifiers_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.txt");
        {
            let ledger = DedupLedger::open(&path).unwrap();
            assert!(ledger.try_claim("https://i.x/😀🙃😀").unwrap());
        }
        let ledger = DedupLedger::open(&path).unwrap();
        assert!(ledger.contains("https://i.x/😀🙃😀"));
    }

    /// File log that runs out of space after `budget` more bytes
    struct FullDisk {
        file: File,
        budget: Arc<Mutex<Option<usize>>>,
        truncate_fails: bool,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut budget = self.budget.lock();
            match *budget {
                None => self.file.write(buf),
                Some(0) => Err(io::Error::new(io::ErrorKind::Other, "no space left on device")),
                Some(left) => {
                    let written = self.file.write(&buf[..left.min(buf.len())])?;
                    *budget = Some(left - written);
                    Ok(written)
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl LedgerLog for FullDisk {
        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only file system"));
            }
            self.file.set_len(len)
        }

        fn sync(&self) -> io::Result<()> {
            self.file.sync_data()
        }
    }

    fn full_disk_ledger(path: &Path, truncate_fails: bool) -> (DedupLedger, Arc<Mutex<Option<usize>>>) {
        let (seen, end) = replay(path).unwrap();
        let file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        let budget = Arc::new(Mutex::new(None));
        let log = FullDisk {
            file,
            budget: Arc::clone(&budget),
            truncate_fails,
        };
        (DedupLedger::with_log(path, seen, end, Box::new(log)), budget)
    }

    #[test]
    fn test_failed_append_leaves_no_partial_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.txt");
        let (ledger, budget) = full_disk_ledger(&path, false);

        assert!(ledger.try_claim("https://x/a").unwrap());
        *budget.lock() = Some(5);
        assert!(ledger.try_claim("https://x/ab").is_err());
        assert!(!ledger.contains("https://x/ab"));

        *budget.lock() = None;
        assert!(ledger.try_claim("https://x/cd").unwrap());
        assert!(ledger.try_claim("https://x/ab").unwrap());
        drop(ledger);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "https://x/a\nhttps://x/cd\nhttps://x/ab\n");

        let ledger = DedupLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(!ledger.try_claim("https://x/cd").unwrap());
    }

    #[test]
    fn test_unrepairable_append_refuses_claims_until_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.txt");
        let (ledger, budget) = full_disk_ledger(&path, true);

        *budget.lock() = Some(5);
        assert!(ledger.try_claim("https://x/ab").is_err());
        *budget.lock() = None;
        assert!(matches!(
            ledger.try_claim("https://x/cd"),
            Err(ProbeError::Persistence { .. })
        ));
        drop(ledger);

        // Reopening cuts the torn tail
        let ledger = DedupLedger::open(&path).unwrap();
        assert!(ledger.is_empty());
        assert!(ledger.try_claim("https://x/cd").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "https://x/cd\n");
    }

    #[test]
    fn test_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/ledger.txt");
        let ledger = DedupLedger::open(&path).unwrap();
        assert!(ledger.try_claim("https://x/a").unwrap());
        assert!(path.exists());
    }
}
