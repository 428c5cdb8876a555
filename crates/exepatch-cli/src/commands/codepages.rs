//! Codepages command: which codepages can hold a translation.

use std::path::Path;

use anyhow::Result;
use exepatch_core::PatchSettings;
use owo_colors::OwoColorize;

use super::{feasible_codepages, load_dictionary, open_store};

/// Run the codepages command
pub fn run(po: &Path, config: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;
    let settings = PatchSettings::load(&store);
    let dictionary = load_dictionary(po, &settings, true, None)?;

    let feasible = feasible_codepages(&dictionary);
    if feasible.is_empty() {
        println!("No supported codepage can represent every translation");
        return Ok(());
    }

    let preferred = settings.choose_codepage(dictionary.language(), &feasible);
    for codepage in &feasible {
        if codepage.name() == preferred {
            println!("{} {}", codepage.name().green().bold(), "(selected)".dimmed());
        } else {
            println!("{}", codepage.name());
        }
    }
    Ok(())
}
