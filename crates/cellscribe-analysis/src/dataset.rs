//! Read-only view of a single-cell dataset.
//!
//! The container itself (count matrix, normalisation, PCA, graph building)
//! lives outside this crate; pipelines only see the summaries exposed here.
//! `DatasetSummary` is the serde-backed form exported by that container.

use cellscribe_core::{CellScribeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const FEATURES_METRIC: &str = "nFeature_RNA";
pub const COUNTS_METRIC: &str = "nCount_RNA";
pub const MITO_METRIC: &str = "percent.mt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableFeature {
    pub gene: String,
    pub variance: f64,
}

/// One principal component: spread plus its strongest loading genes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalComponent {
    pub stdev: f64,
    #[serde(default)]
    pub positive: Vec<String>,
    #[serde(default)]
    pub negative: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PcaResult {
    pub components: Vec<PrincipalComponent>,
}

impl PcaResult {
    /// Percent of the computed variance carried by each component
    pub fn variance_explained(&self) -> Vec<f64> {
        let total: f64 = self.components.iter().map(|pc| pc.stdev * pc.stdev).sum();
        if total <= 0.0 {
            return vec![0.0; self.components.len()];
        }
        self.components
            .iter()
            .map(|pc| pc.stdev * pc.stdev / total * 100.0)
            .collect()
    }
}

/// Accessors the pipelines need from the data container
pub trait CellDataset: Send + Sync {
    fn name(&self) -> &str;

    fn cell_count(&self) -> usize;

    fn gene_count(&self) -> usize;

    /// Per-cell values of a QC metric such as `percent.mt`
    fn qc_metric(&self, metric: &str) -> Option<&[f64]>;

    /// Share of zero entries in the count matrix
    fn zero_fraction(&self) -> Option<f64>;

    fn variable_features(&self) -> Option<&[VariableFeature]>;

    fn pca(&self) -> Option<&PcaResult>;

    /// Distances from each cell to its nearest neighbors
    fn neighbor_distances(&self) -> Option<&[f64]>;

    /// Per-cell labels of a metadata column, e.g. `seurat_clusters`
    fn grouping(&self, key: &str) -> Option<&[String]>;
}

/// Dataset summary exported by the external container as JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub name: String,
    pub n_cells: usize,
    pub n_genes: usize,
    #[serde(default)]
    pub qc_metrics: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub zero_fraction: Option<f64>,
    #[serde(default)]
    pub variable_features: Vec<VariableFeature>,
    #[serde(default)]
    pub pca: Option<PcaResult>,
    #[serde(default)]
    pub neighbor_distances: Vec<f64>,
    #[serde(default)]
    pub groupings: BTreeMap<String, Vec<String>>,
}

impl DatasetSummary {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let summary: DatasetSummary = serde_json::from_str(&content)?;
        Ok(summary)
    }
}

impl CellDataset for DatasetSummary {
    fn name(&self) -> &str {
        &self.name
    }

    fn cell_count(&self) -> usize {
        self.n_cells
    }

    fn gene_count(&self) -> usize {
        self.n_genes
    }

    fn qc_metric(&self, metric: &str) -> Option<&[f64]> {
        self.qc_metrics
            .get(metric)
            .filter(|values| !values.is_empty())
            .map(Vec::as_slice)
    }

    fn zero_fraction(&self) -> Option<f64> {
        self.zero_fraction
    }

    fn variable_features(&self) -> Option<&[VariableFeature]> {
        (!self.variable_features.is_empty()).then_some(self.variable_features.as_slice())
    }

    fn pca(&self) -> Option<&PcaResult> {
        self.pca.as_ref().filter(|pca| !pca.components.is_empty())
    }

    fn neighbor_distances(&self) -> Option<&[f64]> {
        (!self.neighbor_distances.is_empty()).then_some(self.neighbor_distances.as_slice())
    }

    fn grouping(&self, key: &str) -> Option<&[String]> {
        self.groupings
            .get(key)
            .filter(|labels| !labels.is_empty())
            .map(Vec::as_slice)
    }
}

// Precondition helpers: each error names the dataset and the missing step.

pub fn require_cells(data: &dyn CellDataset) -> Result<()> {
    if data.cell_count() == 0 {
        return Err(CellScribeError::Precondition(format!(
            "dataset '{}' contains no cells",
            data.name()
        )));
    }
    Ok(())
}

pub fn require_qc_metric<'a>(data: &'a dyn CellDataset, metric: &str) -> Result<&'a [f64]> {
    data.qc_metric(metric).ok_or_else(|| {
        CellScribeError::Precondition(format!(
            "dataset '{}' has no QC metric '{}'; compute per-cell QC metrics first",
            data.name(),
            metric
        ))
    })
}

pub fn require_variable_features(data: &dyn CellDataset) -> Result<&[VariableFeature]> {
    data.variable_features().ok_or_else(|| {
        CellScribeError::Precondition(format!(
            "dataset '{}' has no variable features; run variable-feature selection first",
            data.name()
        ))
    })
}

pub fn require_pca(data: &dyn CellDataset) -> Result<&PcaResult> {
    data.pca().ok_or_else(|| {
        CellScribeError::Precondition(format!(
            "dataset '{}' has no PCA result; run PCA first",
            data.name()
        ))
    })
}

pub fn require_neighbor_graph(data: &dyn CellDataset) -> Result<&[f64]> {
    data.neighbor_distances().ok_or_else(|| {
        CellScribeError::Precondition(format!(
            "dataset '{}' has no computed neighbor graph; run neighbor-graph construction first",
            data.name()
        ))
    })
}

pub fn require_grouping<'a>(data: &'a dyn CellDataset, key: &str) -> Result<&'a [String]> {
    data.grouping(key).ok_or_else(|| {
        CellScribeError::Precondition(format!(
            "dataset '{}' has no grouping column '{}'; run clustering first or pass the right key",
            data.name(),
            key
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY_JSON: &str = r#"{
        "name": "pbmc3k",
        "n_cells": 4,
        "n_genes": 100,
        "qc_metrics": {"nFeature_RNA": [200, 300, 400, 500], "percent.mt": []},
        "pca": {"components": [{"stdev": 3.0, "positive": ["CST3"]}, {"stdev": 1.0}]},
        "groupings": {"seurat_clusters": ["0", "0", "1", "1"]}
    }"#;

    #[test]
    fn test_summary_from_json() {
        let summary: DatasetSummary = serde_json::from_str(SUMMARY_JSON).unwrap();
        assert_eq!(summary.cell_count(), 4);
        assert_eq!(summary.qc_metric(FEATURES_METRIC).unwrap().len(), 4);
        assert!(summary.qc_metric(MITO_METRIC).is_none());
        assert!(summary.variable_features().is_none());
        assert_eq!(summary.grouping("seurat_clusters").unwrap()[2], "1");
    }

    #[test]
    fn test_precondition_messages_name_the_step() {
        let summary: DatasetSummary = serde_json::from_str(SUMMARY_JSON).unwrap();

        let err = require_neighbor_graph(&summary).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Precondition not met: dataset 'pbmc3k' has no computed neighbor graph; \
             run neighbor-graph construction first"
        );

        let err = require_qc_metric(&summary, MITO_METRIC).unwrap_err();
        assert!(err.to_string().contains("'percent.mt'"));

        assert!(require_pca(&summary).is_ok());
        assert!(require_grouping(&summary, "celltype").is_err());
    }

    #[test]
    fn test_variance_explained() {
        let summary: DatasetSummary = serde_json::from_str(SUMMARY_JSON).unwrap();
        let explained = summary.pca().unwrap().variance_explained();
        assert!((explained[0] - 90.0).abs() < 1e-9);
        assert!((explained[1] - 10.0).abs() < 1e-9);
    }
}
