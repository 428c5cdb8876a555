//! Codepage feasibility filter

use super::Codepage;

/// Check that every string encodes in `codepage` at exactly one byte per character.
///
/// An unmappable character and a length mismatch are equally disqualifying.
pub fn is_feasible<S: AsRef<str>>(codepage: &Codepage, strings: &[S]) -> bool {
    strings.iter().all(|s| {
        let text = s.as_ref();
        match codepage.encode(text) {
            Ok(bytes) => bytes.len() == text.chars().count(),
            Err(_) => false,
        }
    })
}

/// Keep only the candidates into which every string encodes losslessly.
///
/// Candidates are returned in input order; callers that display them sort
/// with [`super::sort_codepages`].
pub fn filter_codepages<'a, I, S>(candidates: I, strings: &[S]) -> Vec<Codepage>
where
    I: IntoIterator<Item = &'a Codepage>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .filter(|cp| is_feasible(cp, strings))
        .copied()
        .collect()
}
