// log.rs — Append-only, hash-chained action log.
//
// The log lives in memory and, optionally, in a JSONL file (one entry per
// line). Each entry's `merkle_hash` is H(payload || previous_hash), so
// inserting, deleting or modifying any past entry breaks every later link.
//
// `append` is the only mutator. After a failed verification the log halts:
// further appends are refused until an operator calls
// `resume_after_intervention`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use crate::entry::{ActionLogEntry, AuditRecord, EntryDraft, EntryKind, Justification};
use crate::error::AuditError;

struct JsonlSink {
    writer: BufWriter<File>,
    path: PathBuf,
}

/// An append-only action log.
pub struct ActionLog {
    entries: Vec<ActionLogEntry>,
    sink: Option<JsonlSink>,
    last_append_at: Option<DateTime<Utc>>,
    anchor_interval: Option<Duration>,
    halted: Option<String>,
}

impl ActionLog {
    /// A log with no file backing. Used by tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            sink: None,
            last_append_at: None,
            anchor_interval: None,
            halted: None,
        }
    }

    /// Open (or create) a file-backed log.
    ///
    /// Existing content is read back and verified so new entries continue the
    /// chain. A broken chain is reported instead of being extended.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let entries = Self::read_verified(&path)?;
            tracing::info!(
                path = %path.display(),
                entries = entries.len(),
                "recovered action log chain"
            );
            entries
        } else {
            Vec::new()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        let last_append_at = entries.last().map(|e| e.timestamp);
        Ok(Self {
            entries,
            sink: Some(JsonlSink {
                writer: BufWriter::new(file),
                path,
            }),
            last_append_at,
            anchor_interval: None,
            halted: None,
        })
    }

    /// Write an `anchor_heartbeat` whenever this much time passes without
    /// any entry (see [`ActionLog::maybe_anchor`]).
    pub fn with_anchor_interval(mut self, interval: Duration) -> Self {
        self.anchor_interval = Some(interval);
        self
    }

    /// Append a draft, linking it to the current chain head.
    pub fn append(&mut self, draft: EntryDraft) -> Result<ActionLogEntry, AuditError> {
        if let Some(reason) = &self.halted {
            return Err(AuditError::Halted {
                reason: reason.clone(),
            });
        }

        let now = Utc::now();
        let mut entry = ActionLogEntry::from_draft(
            draft,
            self.entries.len() as u64,
            now,
            self.head_hash().map(str::to_owned),
        );
        entry.merkle_hash = entry.compute_hash()?;

        if let Some(sink) = &mut self.sink {
            let line = serde_json::to_string(&entry)?;
            writeln!(sink.writer, "{}", line)?;
            sink.writer.flush()?;
        }

        tracing::debug!(seq = entry.seq, kind = %entry.kind, action = %entry.action, "appended");
        self.entries.push(entry.clone());
        self.last_append_at = Some(now);
        Ok(entry)
    }

    /// Append a heartbeat anchor so chain continuity can be checked without
    /// relying on action frequency.
    pub fn anchor_heartbeat(&mut self) -> Result<ActionLogEntry, AuditError> {
        let draft = EntryDraft::new(EntryKind::AnchorHeartbeat, "anchor_heartbeat").with_why(
            Justification::new(format!("chain anchor at length {}", self.entries.len())),
        );
        self.append(draft)
    }

    /// Anchor if the configured interval elapsed since the last entry.
    /// Without an interval this never anchors.
    pub fn maybe_anchor(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<ActionLogEntry>, AuditError> {
        let Some(interval) = self.anchor_interval else {
            return Ok(None);
        };
        let due = match self.last_append_at {
            Some(last) => now - last >= interval,
            None => true,
        };
        if due {
            self.anchor_heartbeat().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Recompute the whole chain: in memory, then on disk if file-backed.
    ///
    /// Any failure halts further appends.
    pub fn verify_chain(&mut self) -> Result<(), AuditError> {
        let result = self.verify_inner();
        if let Err(e) = &result {
            if e.is_integrity_failure() {
                tracing::error!(error = %e, "action log integrity failure; halting appends");
                self.halted = Some(e.to_string());
            }
        }
        result
    }

    fn verify_inner(&mut self) -> Result<(), AuditError> {
        Self::verify_entries(&self.entries)?;
        if let Some(sink) = &mut self.sink {
            sink.writer.flush()?;
            let on_disk = Self::read_verified(&sink.path)?;
            if on_disk.len() != self.entries.len() {
                return Err(AuditError::IntegrityViolation {
                    position: on_disk.len().min(self.entries.len()),
                    detail: format!(
                        "file holds {} entries, log holds {}",
                        on_disk.len(),
                        self.entries.len()
                    ),
                });
            }
            for (i, (a, b)) in on_disk.iter().zip(&self.entries).enumerate() {
                if a.merkle_hash != b.merkle_hash {
                    return Err(AuditError::IntegrityViolation {
                        position: i,
                        detail: "file entry diverges from log".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Verify a sequence of entries starting at the chain origin.
    pub fn verify_entries(entries: &[ActionLogEntry]) -> Result<(), AuditError> {
        let mut previous: Option<&str> = None;
        for (i, entry) in entries.iter().enumerate() {
            if entry.seq != i as u64 {
                return Err(AuditError::IntegrityViolation {
                    position: i,
                    detail: format!("expected seq {}, found {}", i, entry.seq),
                });
            }
            if entry.previous_hash.as_deref() != previous {
                return Err(AuditError::IntegrityViolation {
                    position: i,
                    detail: format!(
                        "previous_hash {} does not match chain head {}",
                        entry.previous_hash.as_deref().unwrap_or("None"),
                        previous.unwrap_or("None")
                    ),
                });
            }
            let recomputed = entry.compute_hash()?;
            if recomputed != entry.merkle_hash {
                return Err(AuditError::IntegrityViolation {
                    position: i,
                    detail: format!(
                        "merkle_hash {} does not match recomputed {}",
                        entry.merkle_hash, recomputed
                    ),
                });
            }
            previous = Some(&entry.merkle_hash);
        }
        Ok(())
    }

    /// Verify a JSONL log file without opening it for writing.
    pub fn verify_file(path: impl AsRef<Path>) -> Result<usize, AuditError> {
        Ok(Self::read_verified(path.as_ref())?.len())
    }

    /// Read every entry of a log file, oldest first, without verification.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<ActionLogEntry>, AuditError> {
        let file = File::open(path.as_ref()).map_err(|source| AuditError::OpenFailed {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    /// Parse and verify a log file. A line that does not parse, or that is
    /// not exactly the canonical encoding of the entry it parses to, counts
    /// as tampering.
    fn read_verified(path: &Path) -> Result<Vec<ActionLogEntry>, AuditError> {
        let file = File::open(path).map_err(|source| AuditError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let mut entries: Vec<ActionLogEntry> = Vec::new();
        for line in BufReader::new(file).split(b'\n') {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let position = entries.len();
            let entry: ActionLogEntry = serde_json::from_slice(&line).map_err(|e| {
                AuditError::IntegrityViolation {
                    position,
                    detail: format!("unparseable entry: {}", e),
                }
            })?;
            if serde_json::to_vec(&entry)? != line {
                return Err(AuditError::IntegrityViolation {
                    position,
                    detail: "entry is not canonically encoded".to_string(),
                });
            }
            entries.push(entry);
        }
        Self::verify_entries(&entries)?;
        Ok(entries)
    }

    /// Clear a halt after an operator has investigated. The resumption is
    /// itself logged.
    pub fn resume_after_intervention(
        &mut self,
        operator: &str,
        note: &str,
    ) -> Result<ActionLogEntry, AuditError> {
        let reason = self.halted.take().unwrap_or_default();
        tracing::warn!(operator, "action log resumed after intervention");
        self.append(
            EntryDraft::new(EntryKind::Operator, "resume_action_log").with_why(
                Justification::new(note)
                    .with_detail(format!("operator: {}", operator))
                    .with_detail(format!("halt reason: {}", reason)),
            ),
        )
    }

    /// Flush buffered output. Permitted in every kill-switch state.
    pub fn flush(&mut self) -> Result<(), AuditError> {
        if let Some(sink) = &mut self.sink {
            sink.writer.flush()?;
        }
        Ok(())
    }

    /// Write the export records as JSON lines.
    pub fn export_jsonl<W: Write>(&self, mut out: W) -> Result<(), AuditError> {
        for record in self.export_records() {
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn export_records(&self) -> Vec<AuditRecord> {
        self.entries.iter().map(ActionLogEntry::to_record).collect()
    }

    pub fn entries(&self) -> &[ActionLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hash of the newest entry, if any.
    pub fn head_hash(&self) -> Option<&str> {
        self.entries.last().map(|e| e.merkle_hash.as_str())
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|s| s.path.as_path())
    }
}
