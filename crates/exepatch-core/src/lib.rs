//! # exepatch-core
//!
//! Core library for translating the strings baked into PE executables.
//!
//! This crate provides:
//! - Codepage registry and the feasibility filter
//! - Translation dictionary loading (PO reader, symbol and space cleanup)
//! - Executable scanning for string occurrences and their code references
//! - Patch planning (in-place rewrite or relocation to a new section)
//! - Binary rewriting with atomic output
//! - Background patch jobs with progress text and cooperative cancellation

pub mod cancel;
pub mod cleanup;
pub mod codepage;
pub mod config;
pub mod dictionary;
pub mod engine;
pub mod error;
pub mod job;
pub mod output;
pub mod pe;
pub mod planner;
pub mod po;
pub mod progress;
pub mod rewriter;
pub mod scanner;

pub use cancel::{CancelToken, Step};
pub use cleanup::{CleanupPolicy, ExclusionRules, SymbolTable, fix_spaces};
pub use codepage::{
    Codepage, DEFAULT_CODEPAGE, filter_codepages, is_feasible, sort_codepages,
    supported_codepages,
};
pub use config::{ConfigStore, JsonConfigStore, MemoryConfigStore, PatchSettings};
pub use dictionary::{Dictionary, TranslationEntry, TranslationRecord};
pub use engine::{RunOptions, RunOptionsBuilder, RunOutcome, RunReport, run};
pub use error::{Error, Result};
pub use job::{JobController, JobPoll, PatchJob};
pub use output::Destination;
pub use pe::PeImage;
pub use planner::{FailedEntry, FailureReason, PatchOperation, Plan, PlanOutcome, Planner};
pub use po::PoFile;
pub use progress::{
    ChannelPoll, ChannelWriter, ProgressReceiver, ProgressSink, StringSink, progress_channel,
};
pub use scanner::{
    ReferenceKind, ScanOptions, ScanReport, Scanner, StringOccurrence, StringReference,
    UnclassifiedReference, UnmatchedEntry,
};
