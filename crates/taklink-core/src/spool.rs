//! The on-disk spool shared by the bridge and the sender.
//!
//! Three sibling directories encode a payload's state by membership:
//! `pending/` (awaiting first send), `sent_buffer/` (sent, awaiting
//! confirmation or retry), `incoming/` (received, awaiting local
//! delivery). The spool IS the inter-process queue; atomic rename on one
//! filesystem is the only durability and ordering mechanism, so every
//! placement goes through a temp file and every move is a rename.
//!
//! Filenames are `<ms_timestamp>_<seq>.zst`; lexicographic order is
//! oldest-first. The `seq` counter breaks same-millisecond ties.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Payload file extension.
const SPOOL_EXT: &str = "zst";
/// Extension of a file claimed for processing. Claimed files resurface in
/// listings so a crash between claim and unlink loses nothing.
const CLAIM_EXT: &str = "work";

/// The three spool states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    SentBuffer,
    Incoming,
}

impl Stage {
    fn dir_name(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::SentBuffer => "sent_buffer",
            Stage::Incoming => "incoming",
        }
    }

    const ALL: [Stage; 3] = [Stage::Pending, Stage::SentBuffer, Stage::Incoming];
}

/// Handle onto the spool root.
#[derive(Debug)]
pub struct Spool {
    root: PathBuf,
    seq: AtomicU64,
}

impl Spool {
    /// Open (creating if needed) the spool directories under `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for stage in Stage::ALL {
            std::fs::create_dir_all(root.join(stage.dir_name()))?;
        }
        Ok(Self { root, seq: AtomicU64::new(0) })
    }

    pub fn dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.dir_name())
    }

    /// Write a payload into a stage via temp + atomic rename.
    ///
    /// `now_ms` becomes the ordering key; ties within one millisecond are
    /// broken by a process-local counter.
    pub fn store(&self, stage: Stage, bytes: &[u8], now_ms: i64) -> io::Result<PathBuf> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let name = format!("{now_ms:013}_{seq:06}.{SPOOL_EXT}");
        let dir = self.dir(stage);
        let tmp = dir.join(format!("{name}.tmp"));
        let path = dir.join(&name);

        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// List a stage's payload files, oldest first. Includes claimed files
    /// left behind by a crashed pass; excludes in-flight temp files.
    pub fn list(&self, stage: Stage) -> io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.dir(stage))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some(SPOOL_EXT) | Some(CLAIM_EXT)
                )
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Move a pending file into `sent_buffer/`, keeping its name (and thus
    /// its age). The file is never in both directories: rename is atomic.
    pub fn promote(&self, pending_path: &Path) -> io::Result<PathBuf> {
        let name = pending_path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no file name"))?;
        let dest = self.dir(Stage::SentBuffer).join(name);
        std::fs::rename(pending_path, &dest)?;
        Ok(dest)
    }

    /// Claim a file for processing by renaming it to the claim extension.
    /// Claiming an already-claimed file (crash recovery) is a no-op.
    pub fn claim(&self, path: &Path) -> io::Result<PathBuf> {
        if path.extension().and_then(|e| e.to_str()) == Some(CLAIM_EXT) {
            return Ok(path.to_path_buf());
        }
        let claimed = path.with_extension(CLAIM_EXT);
        std::fs::rename(path, &claimed)?;
        Ok(claimed)
    }

    /// Remove a processed (or exhausted) file.
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    /// Empty all three directories. Returns how many files went away.
    pub fn purge(&self) -> io::Result<usize> {
        let mut removed = 0;
        for stage in Stage::ALL {
            for entry in std::fs::read_dir(self.dir(stage))? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    std::fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Whether every stage is empty.
    pub fn is_empty(&self) -> io::Result<bool> {
        for stage in Stage::ALL {
            if !self.list(stage)?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_spool() -> Spool {
        let root = std::env::temp_dir().join(format!(
            "taklink-spool-{}-{}",
            std::process::id(),
            rand::random::<u64>()
        ));
        Spool::open(root).unwrap()
    }

    #[test]
    fn store_places_file_in_stage() {
        let spool = temp_spool();
        let path = spool.store(Stage::Pending, b"payload", 1_700_000_000_000).unwrap();
        assert!(path.starts_with(spool.dir(Stage::Pending)));
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        // No temp file left behind.
        assert_eq!(spool.list(Stage::Pending).unwrap().len(), 1);
    }

    #[test]
    fn listing_is_oldest_first() {
        let spool = temp_spool();
        spool.store(Stage::Pending, b"c", 3000).unwrap();
        spool.store(Stage::Pending, b"a", 1000).unwrap();
        spool.store(Stage::Pending, b"b", 2000).unwrap();

        let files = spool.list(Stage::Pending).unwrap();
        let contents: Vec<Vec<u8>> = files.iter().map(|p| std::fs::read(p).unwrap()).collect();
        assert_eq!(contents, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn same_millisecond_files_stay_ordered() {
        let spool = temp_spool();
        let first = spool.store(Stage::Incoming, b"one", 5000).unwrap();
        let second = spool.store(Stage::Incoming, b"two", 5000).unwrap();
        assert_ne!(first, second);
        let files = spool.list(Stage::Incoming).unwrap();
        assert_eq!(files, vec![first, second]);
    }

    #[test]
    fn promote_moves_without_duplication() {
        let spool = temp_spool();
        let pending = spool.store(Stage::Pending, b"x", 1000).unwrap();
        let sent = spool.promote(&pending).unwrap();

        assert!(!pending.exists());
        assert!(sent.exists());
        assert_eq!(pending.file_name(), sent.file_name());
        assert!(spool.list(Stage::Pending).unwrap().is_empty());
        assert_eq!(spool.list(Stage::SentBuffer).unwrap().len(), 1);
    }

    #[test]
    fn claimed_files_resurface_in_listings() {
        let spool = temp_spool();
        let path = spool.store(Stage::Incoming, b"x", 1000).unwrap();
        let claimed = spool.claim(&path).unwrap();

        assert!(!path.exists());
        assert!(claimed.exists());
        // A crashed pass leaves the claim behind; the next listing sees it.
        assert_eq!(spool.list(Stage::Incoming).unwrap(), vec![claimed.clone()]);

        // Re-claiming is idempotent.
        assert_eq!(spool.claim(&claimed).unwrap(), claimed);
    }

    #[test]
    fn purge_empties_every_stage() {
        let spool = temp_spool();
        spool.store(Stage::Pending, b"1", 1000).unwrap();
        spool.store(Stage::SentBuffer, b"2", 1000).unwrap();
        spool.store(Stage::Incoming, b"3", 1000).unwrap();
        assert!(!spool.is_empty().unwrap());

        assert_eq!(spool.purge().unwrap(), 3);
        assert!(spool.is_empty().unwrap());
    }
}
