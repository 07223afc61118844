//! Interaction ledger storage
//!
//! Decisions and feedback are appended to a JSONL file, one event per line.
//! The file is replayed on startup to rebuild the id index used to join
//! feedback back to the decision it rewards.
//!
//! # Usage
//!
//! ```ignore
//! use ragroute_core::storage::InteractionLedger;
//!
//! let (ledger, report) = InteractionLedger::open_in_dir(&data_dir)?;
//! if let Some(decision) = ledger.lookup(&interaction_id) {
//!     println!("{} -> {}", decision.category, decision.handler);
//! }
//! ```

mod ledger;

pub use ledger::{
    DecisionOutcome, DecisionRecord, FeedbackRecord, InteractionLedger, LEDGER_FILE, LedgerEntry,
    ReplayReport,
};
