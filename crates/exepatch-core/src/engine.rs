//! One patch run: read, scan, plan, rewrite, write.

use std::fs;
use std::path::{Path, PathBuf};

use strum::Display;
use tracing::{debug, info};

use crate::cancel::{CancelToken, Step};
use crate::codepage::{Codepage, DEFAULT_CODEPAGE};
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::output::Destination;
use crate::pe::PeImage;
use crate::planner::{FailedEntry, Planner};
use crate::progress::ProgressSink;
use crate::rewriter;
use crate::scanner::{ScanOptions, Scanner, UnclassifiedReference, UnmatchedEntry};

/// Validated inputs of a patch run
#[derive(Debug, Clone)]
pub struct RunOptions {
    executable: PathBuf,
    destination: Destination,
    codepage: Codepage,
    debug: bool,
    scan: ScanOptions,
}

impl RunOptions {
    pub fn builder() -> RunOptionsBuilder {
        RunOptionsBuilder::default()
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn codepage(&self) -> Codepage {
        self.codepage
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn scan_options(&self) -> ScanOptions {
        self.scan
    }
}

/// Builder for RunOptions
#[derive(Debug, Clone, Default)]
pub struct RunOptionsBuilder {
    executable: Option<PathBuf>,
    output: Option<PathBuf>,
    codepage: Option<String>,
    debug: Option<bool>,
    scan: Option<ScanOptions>,
}

impl RunOptionsBuilder {
    /// Set the executable to patch
    pub fn executable<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.executable = Some(path.into());
        self
    }

    /// Set the output path. Empty or unset means patch in place.
    pub fn output<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Set the target codepage by name
    pub fn codepage<S: Into<String>>(mut self, name: S) -> Self {
        self.codepage = Some(name.into());
        self
    }

    /// Enable verbose per-entry progress text
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = Some(enabled);
        self
    }

    pub fn scan_options(mut self, options: ScanOptions) -> Self {
        self.scan = Some(options);
        self
    }

    /// Validate and build the options
    pub fn build(self) -> Result<RunOptions> {
        let executable = self
            .executable
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::Config("no executable selected".to_string()))?;
        if !executable.is_file() {
            return Err(Error::Config(format!(
                "executable not found: {}",
                executable.display()
            )));
        }

        let codepage =
            Codepage::lookup(self.codepage.as_deref().unwrap_or(DEFAULT_CODEPAGE))?;
        let destination = Destination::resolve(&executable, self.output.as_deref());

        Ok(RunOptions {
            executable,
            destination,
            codepage,
            debug: self.debug.unwrap_or(false),
            scan: self.scan.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RunOutcome {
    /// Every matched entry was patched
    Success,
    /// Some entries could not be patched; the rest were written
    #[strum(to_string = "partial failure")]
    PartialFailure,
    /// Stopped on request; nothing was written
    Cancelled,
}

/// End-of-run report handed back to the host
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub codepage: String,
    /// Entries in the dictionary
    pub total_entries: usize,
    /// Entries with an empty translation
    pub unchanged_entries: usize,
    pub patched_entries: usize,
    pub in_place: usize,
    pub relocated: usize,
    pub appended_bytes: usize,
    pub unmatched: Vec<UnmatchedEntry>,
    pub failed: Vec<FailedEntry>,
    pub unclassified: Vec<UnclassifiedReference>,
    /// File that received the patched image, if anything was written
    pub output: Option<PathBuf>,
}

impl RunReport {
    fn new(options: &RunOptions, dictionary: &Dictionary) -> Self {
        Self {
            outcome: RunOutcome::Success,
            codepage: options.codepage.name().to_string(),
            total_entries: dictionary.len(),
            unchanged_entries: dictionary.len() - dictionary.patchable().count(),
            patched_entries: 0,
            in_place: 0,
            relocated: 0,
            appended_bytes: 0,
            unmatched: Vec::new(),
            failed: Vec::new(),
            unclassified: Vec::new(),
            output: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    /// One-line summary with the patched / unmatched / failed counts
    pub fn summary(&self) -> String {
        format!(
            "{}: {} patched ({} in place, {} relocated), {} unmatched, {} failed, {} unchanged",
            self.outcome,
            self.patched_entries,
            self.in_place,
            self.relocated,
            self.unmatched.len(),
            self.failed.len(),
            self.unchanged_entries
        )
    }
}

/// Run one patch.
///
/// Per-entry problems land in the report. I/O errors, malformed images and a
/// broken progress channel abort the run with nothing written. Cancellation
/// is checked between entries and once more before the output is written.
pub fn run(
    options: &RunOptions,
    dictionary: &Dictionary,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<RunReport> {
    if dictionary.is_empty() {
        return Err(Error::Config("no translations loaded".to_string()));
    }

    let mut report = RunReport::new(options, dictionary);
    let codepage = options.codepage;
    info!(
        "Patching {} ({} entries, codepage {})",
        options.executable.display(),
        dictionary.len(),
        codepage
    );

    progress.line(&format!("Reading {}...", options.executable.display()))?;
    let data = fs::read(&options.executable)?;
    let image = PeImage::parse(&data)?;
    progress.line(&format!(
        "PE{} image, base 0x{:X}, {} sections",
        if image.bitness() == 64 { "32+" } else { "32" },
        image.image_base(),
        image.sections().len()
    ))?;

    // Scan and plan see only entries that change something; `positions`
    // maps their indices back to the full dictionary's order.
    let (positions, entries): (Vec<usize>, Vec<_>) = dictionary
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.is_noop())
        .map(|(i, e)| (dictionary.position(i), e))
        .unzip();
    let originals: Vec<&str> = entries.iter().map(|e| e.original.as_str()).collect();
    let translations: Vec<&str> = entries.iter().map(|e| e.translated.as_str()).collect();

    progress.line(&format!("Searching for {} strings...", originals.len()))?;
    let scan = match Scanner::new(&data, &image, codepage)
        .with_options(options.scan)
        .scan(&originals, cancel)
    {
        Step::Done(scan) => scan,
        Step::Cancelled => return cancelled(report, progress),
    };

    progress.line(&format!(
        "Found {} of {} strings ({} references)",
        scan.entries.len(),
        originals.len(),
        scan.reference_count()
    ))?;
    if options.debug {
        for entry in &scan.entries {
            for occurrence in &entry.occurrences {
                progress.line(&format!(
                    "  {:?} at 0x{:X}: span {}, {} reference(s)",
                    entry.original,
                    occurrence.va,
                    occurrence.span,
                    occurrence.references.len()
                ))?;
            }
        }
        for unmatched in &scan.unmatched {
            progress.line(&format!(
                "  Not patched {:?}: {}",
                unmatched.original, unmatched.reason
            ))?;
        }
    }
    for unclassified in &scan.unclassified {
        progress.line(&format!(
            "Unclassified reference to {:?} at 0x{:X}: {}",
            unclassified.original, unclassified.address, unclassified.reason
        ))?;
    }

    progress.line("Planning...")?;
    let outcome = match Planner::new(&data, &image, codepage).plan(&scan, &translations, cancel) {
        Step::Done(outcome) => outcome,
        Step::Cancelled => return cancelled(report, progress),
    };
    for failed in &outcome.failed {
        progress.line(&format!(
            "Failed to patch {:?}: {}",
            failed.original, failed.reason
        ))?;
    }

    let plan = &outcome.plan;
    if options.debug {
        progress.line(&format!(
            "{} in place, {} relocated, {} bytes appended",
            plan.in_place_count(),
            plan.relocation_count(),
            plan.appended_len()
        ))?;
    }

    let patched = rewriter::apply(&data, &image, plan)?;

    if cancel.is_cancelled() {
        return cancelled(report, progress);
    }

    let destination = &options.destination;
    if plan.is_empty() && destination.is_in_place() {
        debug!("Nothing to patch, leaving {} untouched", destination.target().display());
    } else {
        progress.line(&format!("Writing {}...", destination.target().display()))?;
        destination.write(&patched)?;
        report.output = Some(destination.target().to_path_buf());
    }

    report.patched_entries = outcome.patched_entries;
    report.in_place = plan.in_place_count();
    report.relocated = plan.relocation_count();
    report.appended_bytes = plan.appended_len();
    report.unmatched = scan.unmatched;
    for entry in &mut report.unmatched {
        entry.index = positions[entry.index];
    }
    report.unclassified = scan.unclassified;
    report.failed = outcome.failed;
    for entry in &mut report.failed {
        entry.index = positions[entry.index];
    }
    if !report.failed.is_empty() {
        report.outcome = RunOutcome::PartialFailure;
    }

    progress.line(&report.summary())?;
    info!("{}", report.summary());
    Ok(report)
}

fn cancelled(mut report: RunReport, progress: &mut dyn ProgressSink) -> Result<RunReport> {
    report.outcome = RunOutcome::Cancelled;
    info!("Patch cancelled, nothing written");
    progress.line("Cancelled, no changes written.")?;
    Ok(report)
}
