//! Source document parsing and cleanup.
//!
//! Two families of input are supported: line-oriented text (markdown or
//! plain) and table-oriented CSV. Both flatten to cleaned plain text with the
//! paragraph structure the chunker needs: markdown keeps its blank-line
//! paragraph breaks, CSV rows become one sentence-paragraph each.
//!
//! Cleaning drops markdown syntax, decoration runs, and casing, never
//! wording: the surviving text is what citations quote verbatim.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static MARKDOWN_SYMBOLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[#*>`_|~\u{251C}\u{2500}\u{2514}]").unwrap());
static DASH_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").unwrap());
static SPACE_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

/// How a source file should be flattened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Markdown,
    Text,
    Csv,
}

impl SourceFormat {
    /// Guess the format from a file name. Unknown extensions are treated as
    /// plain text.
    #[must_use]
    pub fn from_filename(filename: &str) -> Self {
        match filename.rsplit('.').next().map(str::to_lowercase).as_deref() {
            Some("md" | "markdown") => Self::Markdown,
            Some("csv") => Self::Csv,
            _ => Self::Text,
        }
    }
}

/// A raw document queued for ingestion, already tagged with its department.
#[derive(Clone, Debug)]
pub struct SourceDocument {
    /// Human-readable file identifier carried into chunk metadata.
    pub filename: String,
    /// Canonical lowercase department that owns this document.
    pub department: String,
    /// Raw file contents.
    pub raw: String,
    /// Flattening strategy.
    pub format: SourceFormat,
}

impl SourceDocument {
    /// Convenience constructor inferring the format from the filename.
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        department: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        let format = SourceFormat::from_filename(&filename);
        Self {
            filename,
            department: department.into().to_lowercase(),
            raw: raw.into(),
            format,
        }
    }
}

/// Flatten a document to cleaned plain text, paragraphs separated by blank
/// lines.
#[must_use]
pub fn flatten(document: &SourceDocument) -> String {
    match document.format {
        SourceFormat::Markdown | SourceFormat::Text => clean_lines(&document.raw),
        SourceFormat::Csv => flatten_csv(&document.raw),
    }
}

/// Clean line-oriented text: lowercase, strip markdown decoration, collapse
/// dash runs and interior whitespace, preserve blank-line paragraph breaks.
fn clean_lines(raw: &str) -> String {
    let cleaned: Vec<String> = raw.lines().map(clean_line).collect();
    // Collapse runs of blank lines so paragraphs split exactly once.
    let mut out = Vec::with_capacity(cleaned.len());
    let mut last_blank = true;
    for line in cleaned {
        if line.is_empty() {
            if !last_blank {
                out.push(line);
            }
            last_blank = true;
        } else {
            out.push(line);
            last_blank = false;
        }
    }
    while out.last().is_some_and(String::is_empty) {
        out.pop();
    }
    out.join("\n")
}

fn clean_line(line: &str) -> String {
    let lowered = line.to_lowercase();
    let stripped = MARKDOWN_SYMBOLS_RE.replace_all(&lowered, " ");
    let dashed = DASH_RUN_RE.replace_all(&stripped, " ");
    SPACE_RUN_RE.replace_all(&dashed, " ").trim().to_string()
}

/// Flatten CSV rows into one cleaned sentence-paragraph per row.
fn flatten_csv(raw: &str) -> String {
    split_csv_rows(raw)
        .into_iter()
        .map(|cells| clean_line(&cells.join(" ")))
        .filter(|row| !row.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Minimal quote-aware CSV row splitter. Handles quoted cells with embedded
/// commas and doubled-quote escapes; anything fancier belongs to the tool
/// that produced the file.
fn split_csv_rows(raw: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut cells = Vec::new();
        let mut cell = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if in_quotes && chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => {
                    cells.push(std::mem::take(&mut cell));
                }
                other => cell.push(other),
            }
        }
        cells.push(cell);
        rows.push(cells);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection_by_extension() {
        assert_eq!(SourceFormat::from_filename("report.md"), SourceFormat::Markdown);
        assert_eq!(SourceFormat::from_filename("data.CSV"), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_filename("notes.txt"), SourceFormat::Text);
        assert_eq!(SourceFormat::from_filename("README"), SourceFormat::Text);
    }

    #[test]
    fn markdown_decoration_is_stripped() {
        let doc = SourceDocument::new(
            "r.md",
            "finance",
            "# Revenue Report\n\n**Growth** was `strong`.\n",
        );
        let flat = flatten(&doc);
        assert_eq!(flat, "revenue report\n\ngrowth was strong .");
    }

    #[test]
    fn paragraph_breaks_survive_cleaning() {
        let doc = SourceDocument::new("r.md", "finance", "para one\n\n\n\npara two\n");
        let flat = flatten(&doc);
        assert_eq!(flat.split("\n\n").count(), 2);
    }

    #[test]
    fn csv_rows_become_sentence_paragraphs() {
        let doc = SourceDocument::new(
            "hr.csv",
            "hr",
            "name,role\nAda,\"Engineer, Staff\"\nGrace,Admiral\n",
        );
        let flat = flatten(&doc);
        let rows: Vec<&str> = flat.split("\n\n").collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], "ada engineer, staff");
    }

    #[test]
    fn quoted_csv_cells_keep_embedded_commas_and_quotes() {
        let rows = split_csv_rows("a,\"b,c\",\"say \"\"hi\"\"\"");
        assert_eq!(rows[0], vec!["a", "b,c", "say \"hi\""]);
    }

    #[test]
    fn department_is_lowercased_on_construction() {
        let doc = SourceDocument::new("x.md", "Finance", "text");
        assert_eq!(doc.department, "finance");
    }
}
