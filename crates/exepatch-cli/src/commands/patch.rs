//! Patch command: runs a patch job and streams its progress.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use exepatch_core::{
    ConfigStore, JobPoll, PatchJob, PatchSettings, RunOptions, RunOutcome, RunReport,
};
use owo_colors::OwoColorize;
use tracing::{debug, info, warn};

use super::{feasible_codepages, load_dictionary, open_store};
use crate::cli::PatchArgs;

/// Longest wait for progress before polling the job again
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run the patch command
pub fn run(args: PatchArgs, config: Option<&Path>) -> Result<()> {
    let mut store = open_store(config)?;
    let mut settings = PatchSettings::load(&store);

    let exe = pick_path(args.exe, settings.executable.as_ref(), "executable", "--exe")?;
    let po = pick_path(args.po, settings.translation_file.as_ref(), "translation file", "--po")?;

    let dictionary = load_dictionary(&po, &settings, !args.no_fix_spaces, args.range)?;
    if dictionary.is_empty() {
        bail!("No translations loaded from {}", po.display());
    }
    let language = dictionary.language().map(str::to_string);

    let feasible = feasible_codepages(&dictionary);
    let codepage = match args.codepage {
        Some(name) => {
            if !feasible.iter().any(|cp| cp.name().eq_ignore_ascii_case(&name)) {
                warn!("Codepage {} cannot represent every translation", name);
            }
            name
        }
        None => settings.choose_codepage(language.as_deref(), &feasible),
    };

    let mut builder = RunOptions::builder()
        .executable(&exe)
        .codepage(&codepage)
        .debug(args.debug || settings.debug_output);
    if let Some(output) = &args.output {
        builder = builder.output(output);
    }
    let options = builder.build()?;
    let codepage = options.codepage().name().to_string();

    eprintln!(
        "Patching {} with {} ({} entries, codepage {})",
        exe.display(),
        po.display(),
        dictionary.len(),
        codepage
    );

    let mut job = PatchJob::spawn(options, dictionary)?;
    let cancel = job.cancel_token();
    ctrlc::set_handler(move || {
        info!("Received interrupt, cancelling...");
        cancel.cancel();
    })?;

    let mut stdout = std::io::stdout();
    loop {
        match job.poll_timeout(POLL_INTERVAL) {
            JobPoll::Message(text) => {
                print!("{}", text);
                stdout.flush()?;
            }
            JobPoll::Pending => {}
            JobPoll::Finished => {
                println!("[PROCESS FINISHED]");
                break;
            }
            JobPoll::Disconnected => {
                println!("[MESSAGE QUEUE/PIPE BROKEN]");
                break;
            }
        }
    }

    let report = job.take_result().context("Patch failed")?;
    print_report(&report);

    if report.outcome != RunOutcome::Cancelled {
        settings.remember_codepage(language.as_deref(), &codepage);
        settings.executable = Some(exe);
        settings.translation_file = Some(po);
        settings.store(&mut store);
        store.save().context("Failed to save settings")?;
        debug!("Settings saved to {}", store.path().display());
    }

    Ok(())
}

/// Use the command-line path, or fall back to the remembered one
fn pick_path(
    arg: Option<PathBuf>,
    remembered: Option<&PathBuf>,
    what: &str,
    flag: &str,
) -> Result<PathBuf> {
    match arg.or_else(|| remembered.cloned()) {
        Some(path) => Ok(path),
        None => bail!("No {} selected; pass {}", what, flag),
    }
}

fn print_report(report: &RunReport) {
    println!();
    match report.outcome {
        RunOutcome::Success => println!("{}", report.summary().green().bold()),
        RunOutcome::PartialFailure => println!("{}", report.summary().yellow().bold()),
        RunOutcome::Cancelled => println!("{}", report.summary().red().bold()),
    }

    if !report.unmatched.is_empty() {
        println!("Not found ({}):", report.unmatched.len());
        for entry in &report.unmatched {
            println!("  #{} {:?}: {}", entry.index, entry.original, entry.reason);
        }
    }
    if !report.failed.is_empty() {
        println!("{} ({}):", "Failed".red(), report.failed.len());
        for entry in &report.failed {
            println!("  #{} {:?}: {}", entry.index, entry.original, entry.reason);
        }
    }
    if let Some(path) = &report.output {
        println!("Written: {}", path.display());
    }
}
