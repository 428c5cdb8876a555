//! Exclusions command: prefixes whose translations keep their spacing.

use std::path::Path;

use anyhow::{Context, Result};
use exepatch_core::{ConfigStore, ExclusionRules, PatchSettings};

use super::open_store;
use crate::cli::ExclusionAction;

/// Run the exclusions command
pub fn run(action: ExclusionAction, config: Option<&Path>) -> Result<()> {
    let mut store = open_store(config)?;
    let mut settings = PatchSettings::load(&store);

    let changed = match action {
        ExclusionAction::List { language } => {
            print_rules(&settings.exclusions, language.as_deref());
            false
        }
        ExclusionAction::Add { language, prefix } => {
            let added = settings.exclusions.add(&language, &prefix);
            if !added {
                println!("{:?} is already excluded for {}", prefix, language);
            }
            added
        }
        ExclusionAction::Remove { language, prefix } => {
            let removed = settings.exclusions.remove(&language, &prefix);
            if !removed {
                println!("{:?} is not excluded for {}", prefix, language);
            }
            removed
        }
    };

    if changed {
        settings.store(&mut store);
        store.save().context("Failed to save settings")?;
        println!("Saved to {}", store.path().display());
    }
    Ok(())
}

fn print_rules(rules: &ExclusionRules, language: Option<&str>) {
    let languages: Vec<&str> = match language {
        Some(language) => vec![language],
        None => rules.languages().collect(),
    };
    if languages.is_empty() {
        println!("No exclusions");
        return;
    }
    for language in languages {
        println!("{}:", language);
        for prefix in rules.for_language(Some(language)) {
            println!("  {:?}", prefix);
        }
    }
}
