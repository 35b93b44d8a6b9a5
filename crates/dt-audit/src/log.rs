// log.rs — Append-only, hash-chained JSONL audit trail.
//
// One JSON object per line. Each event's `previous_hash` is the SHA-256 of
// the raw preceding line, so verification never depends on re-serializing
// an event (field order could differ).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::hasher;

pub struct AuditLog {
    writer: BufWriter<File>,
    path: PathBuf,
    last_hash: Option<String>,
}

impl AuditLog {
    /// Open (or create) an audit log, recovering the chain head from any
    /// existing content so new events link correctly.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;
        }

        let last_hash = if path.exists() {
            last_line(&path)?.map(|line| hasher::hash_str(&line))
        } else {
            None
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            last_hash,
        })
    }

    /// Append an event, linking it to the previous one. Flushes after writing.
    pub fn append(&mut self, event: &mut AuditEvent) -> Result<(), AuditError> {
        event.previous_hash = self.last_hash.clone();
        let json = serde_json::to_string(event)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        self.last_hash = Some(hasher::hash_str(&json));
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all events, oldest first. Blank lines are skipped.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events = Vec::new();
        for line in lines(path.as_ref())? {
            events.push(serde_json::from_str(&line?)?);
        }
        Ok(events)
    }

    /// The most recent `count` events, oldest first.
    pub fn tail(path: impl AsRef<Path>, count: usize) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events = Self::read_all(path)?;
        let skip = events.len().saturating_sub(count);
        Ok(events.split_off(skip))
    }

    /// Verify the hash chain. Returns the number of events checked, or an
    /// `IntegrityViolation` naming the first broken link.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<usize, AuditError> {
        let file = File::open(path.as_ref()).map_err(|source| AuditError::OpenFailed {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        let mut previous_hash: Option<String> = None;
        let mut checked = 0;

        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(&line)?;
            if event.previous_hash != previous_hash {
                return Err(AuditError::IntegrityViolation {
                    line: index + 1,
                    expected: previous_hash.unwrap_or_else(|| "None".to_string()),
                    actual: event.previous_hash.unwrap_or_else(|| "None".to_string()),
                });
            }
            previous_hash = Some(hasher::hash_str(&line));
            checked += 1;
        }

        Ok(checked)
    }
}

fn lines(path: &Path) -> Result<impl Iterator<Item = std::io::Result<String>>, AuditError> {
    let file = File::open(path).map_err(|source| AuditError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file)
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty())))
}

fn last_line(path: &Path) -> Result<Option<String>, AuditError> {
    let mut last = None;
    for line in lines(path)? {
        last = Some(line?);
    }
    Ok(last)
}
