use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::constants::PARTIAL_SUFFIX;
use crate::models::{EnvelopeName, KeySidecar};

/// One ciphertext file waiting in the queue, with its key sidecar if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub path: PathBuf,
    pub file_name: String,
    pub sidecar: Option<PathBuf>,
    pub size: u64,
}

impl Envelope {
    /// Files to delete once this envelope is delivered.
    pub fn owned_paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.sidecar.as_deref())
    }
}

/// A group of envelopes sent in one multipart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub envelopes: Vec<Envelope>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.envelopes.iter().map(|e| e.file_name.as_str()).collect()
    }
}

/// Why a queue entry was left out of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Legacy,
    Partial,
    Hidden,
}

/// Snapshot of the ciphertext queue taken once at session start.
#[derive(Debug, Default)]
pub struct QueueScan {
    pub envelopes: Vec<Envelope>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
}

/// Partitions the ciphertext queue into bounded batches.
#[derive(Debug, Clone, Copy)]
pub struct BatchBuilder {
    batch_size: usize,
    max_to_send: usize,
}

impl BatchBuilder {
    /// `max_to_send` of 0 means no per-cycle cap. A zero batch size is
    /// treated as 1.
    pub fn new(batch_size: usize, max_to_send: usize) -> Self {
        BatchBuilder {
            batch_size: batch_size.max(1),
            max_to_send,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// List envelopes directly under `dir`, sorted by file name.
    ///
    /// Directories and other non-regular entries and key sidecars are
    /// ignored. Partial writes, hidden files and names in the legacy format
    /// are reported as skipped. A missing directory is an empty queue.
    pub fn scan(&self, dir: &Path) -> io::Result<QueueScan> {
        let mut scan = QueueScan::default();
        if !dir.exists() {
            debug!("Queue directory {} does not exist yet", dir.display());
            return Ok(scan);
        }

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));

        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() || KeySidecar::is_sidecar(entry.path()) {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().to_string();
            let skip = if file_name.ends_with(PARTIAL_SUFFIX) {
                Some(SkipReason::Partial)
            } else if file_name.starts_with('.') {
                Some(SkipReason::Hidden)
            } else if EnvelopeName::is_legacy(&file_name) {
                Some(SkipReason::Legacy)
            } else {
                None
            };

            if let Some(reason) = skip {
                debug!("Skipping {} ({:?})", entry.path().display(), reason);
                scan.skipped.push((entry.path().to_path_buf(), reason));
                continue;
            }

            let sidecar = KeySidecar::path_for(entry.path());
            let size = entry.metadata().map_err(io::Error::from)?.len();
            scan.envelopes.push(Envelope {
                path: entry.path().to_path_buf(),
                file_name,
                sidecar: sidecar.is_file().then_some(sidecar),
                size,
            });
        }

        let legacy = scan
            .skipped
            .iter()
            .filter(|(_, reason)| *reason == SkipReason::Legacy)
            .count();
        if legacy > 0 {
            info!("Skipped {} legacy-format files in {}", legacy, dir.display());
        }

        Ok(scan)
    }

    /// Split envelopes into batches in order, stopping at the per-cycle cap.
    pub fn partition(&self, envelopes: Vec<Envelope>) -> Vec<Batch> {
        let limit = if self.max_to_send == 0 {
            envelopes.len()
        } else {
            self.max_to_send.min(envelopes.len())
        };

        let mut batches = Vec::new();
        let mut current = Vec::with_capacity(self.batch_size);
        for envelope in envelopes.into_iter().take(limit) {
            current.push(envelope);
            if current.len() == self.batch_size {
                batches.push(Batch {
                    index: batches.len(),
                    envelopes: std::mem::replace(&mut current, Vec::with_capacity(self.batch_size)),
                });
            }
        }
        if !current.is_empty() {
            batches.push(Batch {
                index: batches.len(),
                envelopes: current,
            });
        }

        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::{envelope_name, write_envelope};
    use std::fs;
    use tempfile::TempDir;

    fn envelopes(n: usize) -> Vec<Envelope> {
        (0..n)
            .map(|i| Envelope {
                path: PathBuf::from(format!("/q/{}", envelope_name(i))),
                file_name: envelope_name(i),
                sidecar: None,
                size: 1,
            })
            .collect()
    }

    #[test]
    fn test_partition_fills_batches_in_order() {
        let batches = BatchBuilder::new(10, 0).partition(envelopes(25));

        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert_eq!(batches[2].index, 2);
        assert_eq!(batches[1].envelopes[0].file_name, envelope_name(10));
    }

    #[test]
    fn test_partition_respects_max_to_send() {
        let batches = BatchBuilder::new(10, 15).partition(envelopes(40));
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![10, 5]);

        let batches = BatchBuilder::new(4, 8).partition(envelopes(8));
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![4, 4]);
    }

    #[test]
    fn test_partition_empty_queue() {
        assert!(BatchBuilder::new(10, 0).partition(Vec::new()).is_empty());
    }

    #[test]
    fn test_zero_batch_size_treated_as_one() {
        let batches = BatchBuilder::new(0, 0).partition(envelopes(3));
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn test_no_envelope_in_two_batches() {
        let batches = BatchBuilder::new(3, 0).partition(envelopes(11));
        let mut names: Vec<&str> = batches.iter().flat_map(|b| b.file_names()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 11);
    }

    #[test]
    fn test_scan_sorts_and_classifies_entries() {
        let dir = TempDir::new().unwrap();
        write_envelope(dir.path(), 2, true);
        write_envelope(dir.path(), 0, false);
        write_envelope(dir.path(), 1, true);
        fs::write(dir.path().join("2023_01_01_10_00_00.png"), b"legacy").unwrap();
        fs::write(dir.path().join(format!("{}.part", envelope_name(3))), b"half").unwrap();
        fs::write(dir.path().join(".DS_Store"), b"").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let scan = BatchBuilder::new(10, 0).scan(dir.path()).unwrap();

        let names: Vec<_> = scan.envelopes.iter().map(|e| e.file_name.clone()).collect();
        assert_eq!(names, vec![envelope_name(0), envelope_name(1), envelope_name(2)]);
        assert!(scan.envelopes[0].sidecar.is_none());
        assert!(scan.envelopes[1].sidecar.is_some());

        let mut reasons: Vec<_> = scan.skipped.iter().map(|(_, r)| *r).collect();
        reasons.sort_by_key(|r| format!("{:?}", r));
        assert_eq!(reasons, vec![SkipReason::Hidden, SkipReason::Legacy, SkipReason::Partial]);
    }

    #[test]
    fn test_scan_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let scan = BatchBuilder::new(10, 0).scan(&dir.path().join("absent")).unwrap();
        assert!(scan.envelopes.is_empty());
        assert!(scan.skipped.is_empty());
    }

    #[test]
    fn test_owned_paths_include_sidecar() {
        let envelope = Envelope {
            path: PathBuf::from("/q/a.png"),
            file_name: "a.png".into(),
            sidecar: Some(PathBuf::from("/q/a.png.key.json")),
            size: 3,
        };
        let paths: Vec<_> = envelope.owned_paths().collect();
        assert_eq!(paths, vec![Path::new("/q/a.png"), Path::new("/q/a.png.key.json")]);
    }
}
