//! Marker-delimited blocks inside the shared document.
//!
//! Every instance owns one block:
//!
//! ```text
//! # BEGIN CustomResourceStateMetrics <name>@<namespace>
//! ...encoded resources...
//! # END CustomResourceStateMetrics <name>@<namespace>
//! ```
//!
//! All functions here are pure so they can be tested against literal documents.

/// Preamble written once, when the document is first populated
pub static HEADER: &str = "kind: CustomResourceStateMetrics\nspec:\n  resources:\n";

#[must_use]
pub fn begin_marker(key: &str) -> String {
    format!("# BEGIN CustomResourceStateMetrics {key}")
}

#[must_use]
pub fn end_marker(key: &str) -> String {
    format!("# END CustomResourceStateMetrics {key}")
}

/// Full block text for `key`, terminated by a newline
#[must_use]
pub fn render_block(key: &str, fragment: &str) -> String {
    format!("{}\n{}{}\n", begin_marker(key), fragment, end_marker(key))
}

/// Finds the line range of the block owned by `key`.
///
/// Repeated begin markers overwrite each other, so the last one before a
/// matching end marker wins. A begin marker without a following end marker
/// is not a block.
#[must_use]
pub fn find_block<S: AsRef<str>>(key: &str, lines: &[S]) -> Option<(usize, usize)> {
    let begin_marker = begin_marker(key);
    let end_marker = end_marker(key);
    let mut begin = None;
    let mut found = None;
    for (i, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if line == begin_marker {
            begin = Some(i);
        } else if line == end_marker {
            if let Some(b) = begin {
                found = Some((b, i));
            }
        }
    }
    found
}

/// Joins `lines[start..=end]`.
///
/// A negative `start` clamps to the first line; `end == -1` or an `end` past
/// the last line means through the end. A range reaching the last line has
/// its trailing newlines stripped, any other range ends with exactly one
/// newline so that the next fragment starts on its own line.
#[must_use]
pub fn join_lines<S: AsRef<str>>(lines: &[S], start: isize, end: isize) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let last = lines.len() - 1;
    let start = usize::try_from(start).unwrap_or(0);
    let (end, strip) = match usize::try_from(end) {
        Ok(e) if e < last => (e, false),
        _ => (last, true),
    };
    if start > end {
        return String::new();
    }
    let mut result = lines[start..=end]
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join("\n");
    if strip {
        result.truncate(result.trim_end_matches('\n').len());
    } else if !result.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Result of merging a block into a document
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Upsert {
    /// The identical block is already present
    Unchanged,
    /// The block was missing and got added at the end
    Appended(String),
    /// A different block for the same key got replaced in place
    Replaced(String),
}

impl Upsert {
    /// The new document content, if it changed
    pub fn into_document(self) -> Option<String> {
        match self {
            Upsert::Unchanged => None,
            Upsert::Appended(doc) | Upsert::Replaced(doc) => Some(doc),
        }
    }
}

/// True for the `{}` a ConfigMap key holds before anything was written, or blank content
#[must_use]
pub fn is_placeholder(document: &str) -> bool {
    let trimmed = document.trim();
    trimmed.is_empty() || trimmed == "{}"
}

/// Rebuilds `lines` without `begin..=end`, with `insert` in their place
fn splice(document: &str, lines: &[&str], begin: usize, end: usize, insert: &str) -> String {
    let mut result = String::new();
    if begin > 0 {
        result += &join_lines(lines, 0, isize::try_from(begin - 1).unwrap_or(isize::MAX));
    }
    result += insert;
    if end < lines.len() - 1 {
        result += &join_lines(lines, isize::try_from(end + 1).unwrap_or(isize::MAX), -1);
    }
    if document.ends_with('\n') && !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Inserts or replaces the block of `key` holding `fragment`.
#[must_use]
pub fn upsert_block(document: &str, key: &str, fragment: &str) -> Upsert {
    let block = render_block(key, fragment);
    let lines: Vec<&str> = document.split('\n').collect();
    match find_block(key, &lines) {
        Some((begin, end)) => {
            let current = lines[begin..=end].join("\n");
            if current == block.strip_suffix('\n').unwrap_or(block.as_str()) {
                tracing::debug!("Block {key} already up to date at {begin};{end}");
                return Upsert::Unchanged;
            }
            tracing::debug!("Replacing block {key} at {begin};{end}");
            Upsert::Replaced(splice(document, &lines, begin, end, &block))
        }
        None => {
            let mut result = if is_placeholder(document) {
                HEADER.to_string()
            } else {
                document.to_string()
            };
            if !result.is_empty() && !result.ends_with('\n') {
                result.push('\n');
            }
            tracing::debug!("Appending block {key}");
            result += &block;
            Upsert::Appended(result)
        }
    }
}

/// Removes the block of `key`, `None` when the document has no such block.
#[must_use]
pub fn remove_block(document: &str, key: &str) -> Option<String> {
    let lines: Vec<&str> = document.split('\n').collect();
    let (begin, end) = find_block(key, &lines)?;
    tracing::debug!("Removing block {key} at {begin};{end}");
    Some(splice(document, &lines, begin, end, ""))
}
