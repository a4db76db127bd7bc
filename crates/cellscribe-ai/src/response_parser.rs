//! Turns free-form model answers into typed records.
//!
//! The parsers are deliberately lenient about whitespace and markdown
//! decoration but strict about structure: a malformed annotation line is an
//! error, a malformed network row is skipped and counted.

use crate::prompts::{NETWORK_HEADER_CELLS, NETWORK_HEADER_LINES};
use cellscribe_core::{
    AnnotationRecord, CellScribeError, IntegerRecommendation, NetworkTriple, RawResponse, Result,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Why a network row was left out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Row did not split into exactly three cells
    WrongCellCount(usize),
    /// Gene column held more than one gene
    MultiGeneSubject,
    /// A cell was empty
    EmptyCell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLine {
    /// 1-based line number in the raw response
    pub line_no: usize,
    pub text: String,
    pub reason: SkipReason,
}

/// Triples parsed from a pipe table plus the rows that were dropped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTable {
    pub triples: Vec<NetworkTriple>,
    pub skipped: Vec<SkippedLine>,
}

impl NetworkTable {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

/// Parsing strategy used by the pipelines.
///
/// `LenientParser` follows the text conventions the prompt templates ask for;
/// a stricter implementation can be swapped in without touching orchestration.
pub trait ResponseParser: Send + Sync {
    fn parse_free_text(&self, raw: &RawResponse) -> Result<String>;

    fn parse_integer(&self, raw: &RawResponse) -> Result<IntegerRecommendation>;

    fn parse_annotation_table(
        &self,
        raw: &RawResponse,
        expected_count: usize,
    ) -> Result<Vec<AnnotationRecord>>;

    fn parse_network_table(&self, raw: &RawResponse) -> Result<NetworkTable>;
}

#[derive(Debug, Clone)]
pub struct LenientParser {
    network_header_lines: usize,
}

impl Default for LenientParser {
    fn default() -> Self {
        Self {
            network_header_lines: NETWORK_HEADER_LINES,
        }
    }
}

impl LenientParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network_header_lines(network_header_lines: usize) -> Self {
        Self {
            network_header_lines,
        }
    }
}

impl ResponseParser for LenientParser {
    fn parse_free_text(&self, raw: &RawResponse) -> Result<String> {
        parse_free_text(raw)
    }

    fn parse_integer(&self, raw: &RawResponse) -> Result<IntegerRecommendation> {
        parse_integer(raw)
    }

    fn parse_annotation_table(
        &self,
        raw: &RawResponse,
        expected_count: usize,
    ) -> Result<Vec<AnnotationRecord>> {
        parse_annotation_table(raw, expected_count)
    }

    fn parse_network_table(&self, raw: &RawResponse) -> Result<NetworkTable> {
        parse_network_table_skipping(raw, self.network_header_lines)
    }
}

/// Return the text payload, rejecting blank answers.
pub fn parse_free_text(raw: &RawResponse) -> Result<String> {
    let text = raw.success_text()?.trim();
    if text.is_empty() {
        return Err(CellScribeError::EmptyText("backend response".to_string()));
    }
    Ok(text.to_string())
}

fn digit_run_regex() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"[0-9]+").expect("static digit pattern"))
}

/// Take the first run of decimal digits anywhere in the answer.
///
/// Never fails on content: when no positive integer is found the sentinel 0 is
/// returned with a warning. Only a backend error is propagated.
pub fn parse_integer(raw: &RawResponse) -> Result<IntegerRecommendation> {
    let text = raw.success_text()?;

    let warning = match digit_run_regex().find(text) {
        None => "no number found in the model answer".to_string(),
        Some(m) => match m.as_str().parse::<u32>() {
            Ok(0) => "model recommended 0".to_string(),
            Ok(value) => {
                debug!("Extracted integer recommendation {}", value);
                return Ok(IntegerRecommendation {
                    value,
                    warning: None,
                });
            }
            Err(_) => format!("number '{}' is out of range", m.as_str()),
        },
    };

    warn!("Integer recommendation degraded to 0: {}", warning);
    Ok(IntegerRecommendation {
        value: 0,
        warning: Some(warning),
    })
}

fn list_marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"^(?:[-*•]+\s*|[0-9]+[.)]\s+)").expect("static list marker pattern")
    })
}

fn cluster_prefix_regex() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(r"(?i)^cluster(?:[\s_]+(\S.*)|([0-9].*))$").expect("static cluster prefix pattern")
    })
}

/// Strip list markers (`-`, `*`, `1.`, `2)`), bold markers and a leading
/// "Cluster" word from an id. `Cluster 3`, `cluster_3` and `Cluster3` all
/// become `3`; a name such as `Clusterin` is kept.
fn clean_cluster_id(raw_id: &str) -> String {
    let id = raw_id.trim();
    let id = list_marker_regex().replace(id, "");
    let id = id.trim().trim_matches(['*', '`']).trim();

    match cluster_prefix_regex().captures(id) {
        Some(caps) => caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or(id, |m| m.as_str())
            .trim()
            .to_string(),
        None => id.to_string(),
    }
}

/// Parse `cluster_id:label:reasoning` lines.
///
/// Each non-blank line is split on its first two colons. Every malformed line
/// is reported in one `Parse` error; duplicate ids and a record count other
/// than `expected_count` are errors too.
pub fn parse_annotation_table(
    raw: &RawResponse,
    expected_count: usize,
) -> Result<Vec<AnnotationRecord>> {
    let text = raw.success_text()?;

    let mut records = Vec::new();
    let mut malformed = Vec::new();
    let mut seen = HashSet::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.splitn(3, ':').collect();
        if parts.len() < 3 {
            malformed.push(format!("line {}: '{}'", idx + 1, line));
            continue;
        }

        let cluster_id = clean_cluster_id(parts[0]);
        let label = parts[1].trim().trim_matches('*').trim().to_string();
        let reasoning = parts[2].trim().to_string();

        if cluster_id.is_empty() || label.is_empty() {
            malformed.push(format!("line {}: '{}'", idx + 1, line));
            continue;
        }

        if !seen.insert(cluster_id.clone()) {
            return Err(CellScribeError::DuplicateCluster(cluster_id));
        }

        records.push(AnnotationRecord {
            cluster_id,
            label,
            reasoning,
        });
    }

    if !malformed.is_empty() {
        return Err(CellScribeError::Parse(format!(
            "annotation lines without cluster:label:reasoning form: {}",
            malformed.join("; ")
        )));
    }

    if records.len() != expected_count {
        return Err(CellScribeError::Parse(format!(
            "expected {} annotation records, got {}",
            expected_count,
            records.len()
        )));
    }

    Ok(records)
}

fn is_separator_row(line: &str) -> bool {
    line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn is_single_gene(token: &str) -> bool {
    !token.is_empty()
        && !token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '/' | ';' | '&' | '+'))
}

/// Parse a pipe table after skipping the documented header lines.
pub fn parse_network_table(raw: &RawResponse) -> Result<NetworkTable> {
    parse_network_table_skipping(raw, NETWORK_HEADER_LINES)
}

fn is_header_row(cells: &[&str]) -> bool {
    cells.len() == NETWORK_HEADER_CELLS.len()
        && cells
            .iter()
            .zip(NETWORK_HEADER_CELLS)
            .all(|(cell, name)| cell.trim_matches(['*', '`']).trim().eq_ignore_ascii_case(name))
}

/// Parse a pipe table after skipping `header_lines` non-blank lines.
///
/// Blank lines never count towards the header. Separator rows and repeats of
/// the `Gene | Relation | Concept` header are ignored wherever they appear;
/// any other row that does not map to one triple is skipped and recorded.
pub fn parse_network_table_skipping(raw: &RawResponse, header_lines: usize) -> Result<NetworkTable> {
    let text = raw.success_text()?;
    let mut table = NetworkTable::default();

    let body = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .skip(header_lines);

    for (idx, line) in body {
        let line = line.trim();
        if is_separator_row(line) {
            continue;
        }

        let inner = line.strip_prefix('|').unwrap_or(line);
        let inner = inner.strip_suffix('|').unwrap_or(inner);
        let cells: Vec<&str> = inner.split('|').map(str::trim).collect();
        if is_header_row(&cells) {
            continue;
        }

        let skip = |reason| SkippedLine {
            line_no: idx + 1,
            text: line.to_string(),
            reason,
        };

        if cells.len() != 3 {
            table.skipped.push(skip(SkipReason::WrongCellCount(cells.len())));
            continue;
        }

        let subject = cells[0].trim_matches(['*', '`']).trim();
        if subject.is_empty() || cells[1].is_empty() || cells[2].is_empty() {
            table.skipped.push(skip(SkipReason::EmptyCell));
            continue;
        }
        if !is_single_gene(subject) {
            table.skipped.push(skip(SkipReason::MultiGeneSubject));
            continue;
        }

        table
            .triples
            .push(NetworkTriple::new(subject, cells[1], cells[2]));
    }

    if !table.skipped.is_empty() {
        warn!(
            "Skipped {} malformed network rows ({} kept)",
            table.skipped.len(),
            table.triples.len()
        );
    }

    Ok(table)
}
