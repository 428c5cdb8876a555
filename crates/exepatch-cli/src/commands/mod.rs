//! CLI command implementations.

pub mod codepages;
pub mod exclusions;
pub mod patch;
pub mod scan;

use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use exepatch_core::{
    CleanupPolicy, Codepage, Dictionary, JsonConfigStore, PatchSettings, PoFile,
    filter_codepages, sort_codepages, supported_codepages,
};
use tracing::{debug, warn};

/// Open the settings store at `path`, or the default location
pub(crate) fn open_store(path: Option<&Path>) -> Result<JsonConfigStore> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => JsonConfigStore::default_path()
            .context("Cannot determine the user config directory; pass --config")?,
    };
    debug!("Settings: {}", path.display());
    JsonConfigStore::open(&path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))
}

/// Read a PO file and build the cleaned dictionary
pub(crate) fn load_dictionary(
    po: &Path,
    settings: &PatchSettings,
    fix_spaces: bool,
    range: Option<Range<usize>>,
) -> Result<Dictionary> {
    let file = PoFile::load(po).with_context(|| format!("Failed to read {}", po.display()))?;
    let language = file.language().map(str::to_string);
    if language.is_none() {
        warn!("{} has no Language header", po.display());
    }

    let policy = CleanupPolicy {
        fix_spaces: fix_spaces && settings.add_leading_trailing_spaces,
        ..CleanupPolicy::default()
    };
    let dictionary = Dictionary::load(
        file.into_records(),
        language.as_deref(),
        &settings.exclusions,
        &policy,
    );
    if dictionary.duplicates() > 0 {
        warn!(
            "{} duplicate originals ignored (first translation kept)",
            dictionary.duplicates()
        );
    }

    Ok(match range {
        Some(range) => dictionary.subset(range),
        None => dictionary,
    })
}

/// Codepages able to hold every translation, in display order
pub(crate) fn feasible_codepages(dictionary: &Dictionary) -> Vec<Codepage> {
    let translations: Vec<&str> = dictionary
        .patchable()
        .map(|e| e.translated.as_str())
        .collect();
    let mut feasible = filter_codepages(supported_codepages(), &translations);
    sort_codepages(&mut feasible);
    feasible
}
