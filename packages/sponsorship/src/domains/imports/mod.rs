//! Imports domain - reconciling a new roster with the availability ledger

pub mod analyzer;
pub mod apply;
pub mod roster;

pub use analyzer::{analyze_import, ChildUpdate, FieldChange, ImportAnalysis, ImportWarning};
pub use apply::{ImportOptions, ImportReconciler, ImportReport, IMPORT_CANCEL_REASON};
pub use roster::{JsonRosterFile, RosterEntry, RosterSource};
