//! Trading Audit Library
//!
//! Diagnose/repair/verify cycle for a venue's persisted accounting state:
//! wallet balances, open orders, leveraged positions, and the transaction
//! ledger. The checker raises typed issues, the repair engine applies
//! idempotent mutations, and the verification loop diffs issue kinds.
//!
//! The tool is single-threaded and synchronous end to end; each write is
//! committed individually. Run it against a quiesced or snapshot copy of
//! the store: there is no isolation from concurrent trading traffic.

pub mod checker;
pub mod classify;
pub mod models;
pub mod repair;
pub mod report;
pub mod store;
pub mod verify;

pub use checker::{DiagnosisSnapshot, InvariantChecker};
pub use models::{AuditConfig, FixRecord, Issue, IssueKind, RepairMode, RepairOutcome, Severity};
pub use repair::RepairEngine;
pub use store::Store;
pub use verify::{verify, VerificationResult};
