//! Command-line argument definitions.

use std::ops::Range;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "exepatch")]
#[command(about = "Translate the strings inside a PE executable", version)]
pub struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, env = "EXEPATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose diagnostics
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Patch an executable with a PO translation
    Patch(PatchArgs),

    /// List codepages able to hold every translation
    Codepages {
        /// Translation file
        #[arg(long)]
        po: PathBuf,
    },

    /// Report where the translated strings live, without patching
    Scan {
        /// Executable to scan
        #[arg(long)]
        exe: PathBuf,

        /// Translation file
        #[arg(long)]
        po: PathBuf,

        /// Codepage for encoding originals
        #[arg(long)]
        codepage: Option<String>,
    },

    /// Manage prefixes exempt from space fixing
    Exclusions {
        #[command(subcommand)]
        action: ExclusionAction,
    },
}

#[derive(clap::Args)]
pub struct PatchArgs {
    /// Executable to patch (defaults to the last one used)
    #[arg(long)]
    pub exe: Option<PathBuf>,

    /// Translation file (defaults to the last one used)
    #[arg(long)]
    pub po: Option<PathBuf>,

    /// Target codepage (defaults to the remembered one for the language)
    #[arg(long)]
    pub codepage: Option<String>,

    /// Output file. Omit to patch in place, keeping a .bak copy.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Verbose per-string progress
    #[arg(long)]
    pub debug: bool,

    /// Keep translation whitespace as written
    #[arg(long)]
    pub no_fix_spaces: bool,

    /// Only apply dictionary entries START:END
    #[arg(long, value_parser = parse_range)]
    pub range: Option<Range<usize>>,
}

#[derive(Subcommand)]
pub enum ExclusionAction {
    /// Show exclusion prefixes
    List {
        #[arg(long)]
        language: Option<String>,
    },
    /// Add a prefix for a language
    Add {
        #[arg(long)]
        language: String,
        prefix: String,
    },
    /// Remove a prefix for a language
    Remove {
        #[arg(long)]
        language: String,
        prefix: String,
    },
}

/// Parse `START:END`; either bound may be omitted
pub fn parse_range(s: &str) -> Result<Range<usize>, String> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got {s:?}"))?;
    let parse = |part: &str, default: usize| -> Result<usize, String> {
        let part = part.trim();
        if part.is_empty() {
            Ok(default)
        } else {
            part.parse()
                .map_err(|e| format!("invalid bound {part:?}: {e}"))
        }
    };
    let start = parse(start, 0)?;
    let end = parse(end, usize::MAX)?;
    if start > end {
        return Err(format!("range start {start} is after end {end}"));
    }
    Ok(start..end)
}
