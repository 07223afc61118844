//! Append-only interaction ledger
//!
//! Every routing decision and every feedback event becomes one JSON line in
//! `interactions.jsonl`:
//!
//! ```text
//! {"type":"decision","interaction_id":"…","question":"…","category":"factual","handler":"naive_rag",…}
//! {"type":"feedback","interaction_id":"…","reward":1.0,…}
//! ```
//!
//! The file is the source of truth and is never rewritten in place. The
//! in-memory index from interaction id to decision is a cache rebuilt by
//! replaying the file on open. Retention is unbounded: any decision that made
//! it to the log can still receive feedback.
//!
//! Appends are serialized under one mutex so file order equals insertion
//! order. A failed write keeps the line queued in memory and is retried on the
//! next append or [`InteractionLedger::flush`]; readers always see every
//! completed append regardless.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::routing::Category;

/// Default ledger file name inside the data directory
pub const LEDGER_FILE: &str = "interactions.jsonl";

/// What happened when the chosen handler ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// The handler returned an answer
    Completed,
    /// The handler failed or timed out
    Failed { error: String },
    /// The caller went away before the handler finished
    Cancelled,
}

/// One routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub interaction_id: String,
    pub question: String,
    pub category: Category,
    pub handler: String,
    pub top_k: usize,
    pub manual_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_count: Option<usize>,
    pub outcome: DecisionOutcome,
    pub timestamp: DateTime<Utc>,
}

/// One reward signal for an earlier decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub interaction_id: String,
    /// Copied from the decision so the log reads on its own
    pub category: Category,
    pub handler: String,
    pub reward: f64,
    pub timestamp: DateTime<Utc>,
}

/// A ledger line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEntry {
    Decision(DecisionRecord),
    Feedback(FeedbackRecord),
}

impl LedgerEntry {
    pub fn interaction_id(&self) -> &str {
        match self {
            Self::Decision(d) => &d.interaction_id,
            Self::Feedback(f) => &f.interaction_id,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    entries: Vec<LedgerEntry>,
    index: HashMap<String, DecisionRecord>,
    /// Newline-terminated bytes that have not reached disk yet. A line cut
    /// short by a failed write keeps only its unwritten tail here.
    pending: Vec<u8>,
}

impl LedgerInner {
    fn apply(&mut self, entry: LedgerEntry) {
        if let LedgerEntry::Decision(decision) = &entry {
            let previous = self
                .index
                .insert(decision.interaction_id.clone(), decision.clone());
            if previous.is_some() {
                warn!(interaction_id = %decision.interaction_id, "Duplicate interaction id in ledger, keeping the latest decision");
            }
        }
        self.entries.push(entry);
    }
}

/// Result of replaying a ledger file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub entries: usize,
    pub skipped_lines: usize,
}

/// Append-only log of decisions and feedback with an id index
#[derive(Debug)]
pub struct InteractionLedger {
    path: Option<PathBuf>,
    inner: Mutex<LedgerInner>,
}

impl InteractionLedger {
    /// A ledger that only lives in memory
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(LedgerInner::default()),
        }
    }

    /// Open (or create) the ledger at `path` and rebuild the index
    ///
    /// Lines that do not parse are skipped with a warning; they stay in the
    /// file untouched.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, ReplayReport)> {
        let path = path.into();
        let mut inner = LedgerInner::default();
        let mut report = ReplayReport::default();

        match File::open(&path) {
            Ok(file) => {
                for (line_no, line) in BufReader::new(file).lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LedgerEntry>(&line) {
                        Ok(entry) => {
                            inner.apply(entry);
                            report.entries += 1;
                        }
                        Err(e) => {
                            report.skipped_lines += 1;
                            warn!(
                                path = %path.display(),
                                line = line_no + 1,
                                error = %e,
                                "Skipping unreadable ledger line"
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }

        info!(
            path = %path.display(),
            entries = report.entries,
            decisions = inner.index.len(),
            skipped = report.skipped_lines,
            "Replayed interaction ledger"
        );

        Ok((
            Self {
                path: Some(path),
                inner: Mutex::new(inner),
            },
            report,
        ))
    }

    /// Open the default ledger file inside `data_dir`
    pub fn open_in_dir(data_dir: &Path) -> Result<(Self, ReplayReport)> {
        Self::open(data_dir.join(LEDGER_FILE))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a decision and index it
    pub fn record_decision(&self, record: DecisionRecord) {
        debug!(
            interaction_id = %record.interaction_id,
            category = %record.category,
            handler = %record.handler,
            "Recording decision"
        );
        self.append(LedgerEntry::Decision(record));
    }

    /// Append a feedback event
    pub fn record_feedback(&self, record: FeedbackRecord) {
        debug!(
            interaction_id = %record.interaction_id,
            reward = record.reward,
            "Recording feedback"
        );
        self.append(LedgerEntry::Feedback(record));
    }

    fn append(&self, entry: LedgerEntry) {
        let mut inner = self.lock();
        if self.path.is_some() {
            match serde_json::to_string(&entry) {
                Ok(line) => {
                    inner.pending.extend_from_slice(line.as_bytes());
                    inner.pending.push(b'\n');
                }
                Err(e) => warn!(error = %e, "Failed to serialize ledger entry"),
            }
        }
        inner.apply(entry);

        if let Err(e) = self.write_pending(&mut inner) {
            warn!(
                pending = pending_lines(&inner.pending),
                error = %e,
                "Failed to append to ledger, will retry on next write"
            );
        }
    }

    /// Write any queued lines to disk
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock();
        self.write_pending(&mut inner)
    }

    fn write_pending(&self, inner: &mut LedgerInner) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if inner.pending.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::PersistenceFailure(format!("{}: {}", path.display(), e)))?;
        drain_into(&mut file, &mut inner.pending)
            .map_err(|e| Error::PersistenceFailure(format!("{}: {}", path.display(), e)))
    }

    /// Decision for an interaction id
    pub fn lookup(&self, interaction_id: &str) -> Option<DecisionRecord> {
        self.lock().index.get(interaction_id).cloned()
    }

    /// Copy of every entry, in insertion order
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn decision_count(&self) -> usize {
        self.lock().index.len()
    }

    pub fn feedback_count(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| matches!(e, LedgerEntry::Feedback(_)))
            .count()
    }

    /// Lines still waiting to be written
    pub fn pending_writes(&self) -> usize {
        pending_lines(&self.lock().pending)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        // Entries are only ever pushed, so a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Write `pending` to `writer`, dropping exactly the bytes it accepted
///
/// After a short or failed write the remainder resumes exactly where the
/// file stopped.
fn drain_into<W: Write>(writer: &mut W, pending: &mut Vec<u8>) -> io::Result<()> {
    let mut written = 0;
    let result = loop {
        if written == pending.len() {
            break writer.flush();
        }
        match writer.write(&pending[written..]) {
            Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => break Err(e),
        }
    };
    pending.drain(..written);
    result
}

fn pending_lines(pending: &[u8]) -> usize {
    pending.iter().filter(|&&b| b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn decision(id: &str, category: Category, handler: &str) -> DecisionRecord {
        DecisionRecord {
            interaction_id: id.to_string(),
            question: "What is the capital of France?".to_string(),
            category,
            handler: handler.to_string(),
            top_k: 5,
            manual_override: false,
            source_count: Some(3),
            outcome: DecisionOutcome::Completed,
            timestamp: Utc::now(),
        }
    }

    fn feedback(id: &str, reward: f64) -> FeedbackRecord {
        FeedbackRecord {
            interaction_id: id.to_string(),
            category: Category::Factual,
            handler: "naive_rag".to_string(),
            reward,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_in_memory_index() {
        let ledger = InteractionLedger::in_memory();
        ledger.record_decision(decision("a1", Category::Factual, "naive_rag"));
        ledger.record_feedback(feedback("a1", 1.0));

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.decision_count(), 1);
        assert_eq!(ledger.feedback_count(), 1);
        assert_eq!(ledger.lookup("a1").unwrap().handler, "naive_rag");
        assert!(ledger.lookup("missing").is_none());
        assert_eq!(ledger.pending_writes(), 0);
    }

    #[test]
    fn test_line_format_has_type_discriminant() {
        let line = serde_json::to_string(&LedgerEntry::Decision(decision(
            "x",
            Category::Visual,
            "multimodal_rag",
        )))
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "decision");
        assert_eq!(value["category"], "visual");
        assert_eq!(value["outcome"]["status"], "completed");

        let failed = DecisionOutcome::Failed {
            error: "timeout".into(),
        };
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "timeout");
    }

    #[test]
    fn test_replay_rebuilds_index_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        {
            let (ledger, report) = InteractionLedger::open(&path).unwrap();
            assert_eq!(report.entries, 0);
            ledger.record_decision(decision("first", Category::Factual, "naive_rag"));
            ledger.record_decision(decision("second", Category::Relational, "graph_rag"));
            ledger.record_feedback(feedback("first", 0.25));
        }

        let (ledger, report) = InteractionLedger::open(&path).unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(report.skipped_lines, 0);
        assert_eq!(ledger.lookup("second").unwrap().category, Category::Relational);

        let ids: Vec<String> = ledger
            .entries()
            .iter()
            .map(|e| e.interaction_id().to_string())
            .collect();
        assert_eq!(ids, ["first", "second", "first"]);
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        {
            let (ledger, _) = InteractionLedger::open(&path).unwrap();
            ledger.record_decision(decision("ok", Category::Factual, "naive_rag"));
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"type\":\"decision\",\"truncated").unwrap();
        writeln!(file).unwrap();

        let (ledger, report) = InteractionLedger::open(&path).unwrap();
        assert_eq!(report.entries, 1);
        assert_eq!(report.skipped_lines, 1);
        assert!(ledger.lookup("ok").is_some());
    }

    #[test]
    fn test_file_is_append_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        let (ledger, _) = InteractionLedger::open(&path).unwrap();
        ledger.record_decision(decision("a", Category::Factual, "naive_rag"));
        let first = std::fs::read_to_string(&path).unwrap();
        ledger.record_feedback(feedback("a", 0.5));
        let second = std::fs::read_to_string(&path).unwrap();

        assert!(second.starts_with(&first));
        assert_eq!(second.lines().count(), 2);
    }

    #[test]
    fn test_failed_writes_stay_queued() {
        let dir = tempdir().unwrap();
        // A directory where the file should be makes every open fail.
        let path = dir.path().join("blocked");
        std::fs::create_dir(&path).unwrap();
        let ledger = InteractionLedger {
            path: Some(path.clone()),
            inner: Mutex::new(LedgerInner::default()),
        };

        ledger.record_decision(decision("q", Category::Vague, "hyde_rag"));
        assert_eq!(ledger.pending_writes(), 1);
        assert!(ledger.lookup("q").is_some());
        assert!(matches!(ledger.flush(), Err(Error::PersistenceFailure(_))));

        std::fs::remove_dir(&path).unwrap();
        ledger.flush().unwrap();
        assert_eq!(ledger.pending_writes(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    /// Accepts `budget` bytes, then fails until refilled
    struct ShortWriter {
        out: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.budget);
            self.out.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_write_resumes_mid_line() {
        let first = LedgerEntry::Decision(decision("a", Category::Factual, "naive_rag"));
        let second = LedgerEntry::Decision(decision("b", Category::Visual, "multimodal_rag"));
        let mut pending = Vec::new();
        for entry in [&first, &second] {
            pending.extend_from_slice(serde_json::to_string(entry).unwrap().as_bytes());
            pending.push(b'\n');
        }
        let expected = pending.clone();

        let mut writer = ShortWriter {
            out: Vec::new(),
            budget: 17,
        };
        assert!(drain_into(&mut writer, &mut pending).is_err());
        assert_eq!(writer.out.len(), 17);
        assert_eq!(pending_lines(&pending), 2);

        writer.budget = usize::MAX;
        drain_into(&mut writer, &mut pending).unwrap();
        assert!(pending.is_empty());
        assert_eq!(writer.out, expected);

        let replayed: Vec<LedgerEntry> = String::from_utf8(writer.out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replayed, vec![first, second]);
    }
}
