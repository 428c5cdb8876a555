//! Scan command: where each translated string lives, without patching.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use exepatch_core::{CancelToken, Codepage, PatchSettings, PeImage, Scanner};
use owo_colors::OwoColorize;

use super::{feasible_codepages, load_dictionary, open_store};

/// Run the scan command
pub fn run(exe: &Path, po: &Path, codepage: Option<&str>, config: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;
    let settings = PatchSettings::load(&store);
    let dictionary = load_dictionary(po, &settings, true, None)?;

    let codepage = match codepage {
        Some(name) => Codepage::lookup(name)?,
        None => Codepage::lookup(
            &settings.choose_codepage(dictionary.language(), &feasible_codepages(&dictionary)),
        )?,
    };

    let data = fs::read(exe).with_context(|| format!("Failed to read {}", exe.display()))?;
    let image = PeImage::parse(&data)?;
    println!(
        "=== {} (PE{}, base 0x{:X}, codepage {}) ===",
        exe.display(),
        if image.bitness() == 64 { "32+" } else { "32" },
        image.image_base(),
        codepage
    );

    let originals: Vec<&str> = dictionary
        .patchable()
        .map(|e| e.original.as_str())
        .collect();
    let Some(report) = Scanner::new(&data, &image, codepage)
        .scan(&originals, &CancelToken::new())
        .done()
    else {
        bail!("Scan cancelled");
    };

    for entry in &report.entries {
        println!("{}", format!("{:?}", entry.original).bold());
        for occurrence in &entry.occurrences {
            println!(
                "  0x{:X} (file 0x{:X}, span {}{}{})",
                occurrence.va,
                occurrence.offset,
                occurrence.span,
                if occurrence.standalone { "" } else { ", embedded" },
                if occurrence.pinned { ", pinned" } else { "" }
            );
            for reference in &occurrence.references {
                println!(
                    "    {:<12} at 0x{:X} ({} bytes)",
                    reference.kind.to_string(),
                    reference.address,
                    reference.width
                );
            }
        }
    }

    if !report.unmatched.is_empty() {
        println!();
        println!("{} ({}):", "Not found".yellow(), report.unmatched.len());
        for entry in &report.unmatched {
            println!("  {:?}: {}", entry.original, entry.reason);
        }
    }
    if !report.unclassified.is_empty() {
        println!();
        println!("{} ({}):", "Unclassified references".yellow(), report.unclassified.len());
        for reference in &report.unclassified {
            println!(
                "  0x{:X} -> 0x{:X} {:?}: {}",
                reference.address, reference.target, reference.original, reference.reason
            );
        }
    }

    println!();
    println!(
        "{} of {} strings found, {} occurrences, {} references",
        report.entries.len(),
        originals.len(),
        report.occurrence_count(),
        report.reference_count()
    );
    Ok(())
}
