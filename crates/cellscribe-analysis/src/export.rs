//! Tab-separated exports of annotation records and network triples.

use cellscribe_core::{AnnotationRecord, NetworkTriple, Result};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const ANNOTATION_HEADER: [&str; 3] = ["cluster_id", "label", "reasoning"];
pub const NETWORK_HEADER: [&str; 3] = ["subject_gene", "relation", "object"];

pub fn write_annotation_tsv(path: &Path, records: &[AnnotationRecord]) -> Result<()> {
    let rows = records
        .iter()
        .map(|r| [r.cluster_id.as_str(), r.label.as_str(), r.reasoning.as_str()]);
    write_tsv(path, ANNOTATION_HEADER, rows)?;
    info!("Wrote {} annotation rows to {}", records.len(), path.display());
    Ok(())
}

pub fn write_network_tsv(path: &Path, triples: &[NetworkTriple]) -> Result<()> {
    let rows = triples
        .iter()
        .map(|t| [t.subject_gene.as_str(), t.relation.as_str(), t.object.as_str()]);
    write_tsv(path, NETWORK_HEADER, rows)?;
    info!("Wrote {} network rows to {}", triples.len(), path.display());
    Ok(())
}

fn write_tsv<'a>(
    path: &Path,
    header: [&str; 3],
    rows: impl Iterator<Item = [&'a str; 3]>,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(out, "{}", header.join("\t"))?;
    for row in rows {
        let cells: Vec<String> = row.iter().map(|cell| sanitize(cell)).collect();
        writeln!(out, "{}", cells.join("\t"))?;
    }
    out.flush()?;
    Ok(())
}

// Tabs and line breaks would shift columns
fn sanitize(cell: &str) -> String {
    cell.replace(['\t', '\r', '\n'], " ")
}
