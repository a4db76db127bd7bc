//! Cluster annotation and identity merge.
//!
//! The grouping column is named by the caller. Predicted cluster ids are
//! matched exactly against the distinct labels of that column.

use super::{AnalysisPipeline, PipelineRunner};
use crate::dataset::{require_cells, require_grouping, CellDataset};
use cellscribe_ai::{PromptFields, ResponseParser, TemplateKind};
use cellscribe_core::{
    AnnotationRecord, BackendSelector, CellScribeError, ClusterMarkerSet, GenerationConfig,
    ParsedResult, RawResponse, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// What to do with predicted cluster ids the grouping does not contain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Fail with `UnmatchedCluster`
    #[default]
    Strict,
    /// Merge what matches and list the rest
    ReportUnmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationOutcome {
    pub records: Vec<AnnotationRecord>,
    /// cluster id -> predicted cell type
    pub identities: BTreeMap<String, String>,
    /// Predicted ids with no counterpart in the grouping
    pub unmatched: Vec<String>,
    /// One entry per cell, `None` where its cluster got no label
    pub cell_labels: Vec<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct AnnotationPipeline {
    pub markers: ClusterMarkerSet,
    pub species: String,
    pub tissue: String,
    /// Metadata column holding the cluster of each cell
    pub grouping_key: String,
    /// Marker genes per cluster sent to the model
    pub top_n: usize,
    pub merge_policy: MergePolicy,
}

impl AnnotationPipeline {
    pub fn new(
        markers: ClusterMarkerSet,
        species: impl Into<String>,
        tissue: impl Into<String>,
        grouping_key: impl Into<String>,
    ) -> Self {
        Self {
            markers,
            species: species.into(),
            tissue: tissue.into(),
            grouping_key: grouping_key.into(),
            top_n: 10,
            merge_policy: MergePolicy::Strict,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n.max(1);
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Run the pipeline and merge the labels into the grouping
    pub async fn annotate(
        &self,
        runner: &PipelineRunner,
        data: &dyn CellDataset,
        backend: BackendSelector,
        config: &GenerationConfig,
    ) -> Result<AnnotationOutcome> {
        let parsed = runner.run(self, data, backend, config).await?;
        let records = match parsed {
            ParsedResult::Annotations(records) => records,
            other => {
                return Err(CellScribeError::Parse(format!(
                    "annotation pipeline produced {:?} instead of annotation records",
                    other
                )))
            }
        };
        self.merge(data, records)
    }

    /// Match each record's cluster id against the grouping labels
    pub fn merge(
        &self,
        data: &dyn CellDataset,
        records: Vec<AnnotationRecord>,
    ) -> Result<AnnotationOutcome> {
        let groups = require_grouping(data, &self.grouping_key)?;
        let known: BTreeSet<&str> = groups.iter().map(String::as_str).collect();

        let mut identities = BTreeMap::new();
        let mut unmatched = Vec::new();
        for record in &records {
            if known.contains(record.cluster_id.as_str()) {
                identities.insert(record.cluster_id.clone(), record.label.clone());
            } else {
                unmatched.push(record.cluster_id.clone());
            }
        }

        if !unmatched.is_empty() {
            match self.merge_policy {
                MergePolicy::Strict => return Err(CellScribeError::UnmatchedCluster(unmatched)),
                MergePolicy::ReportUnmatched => warn!(
                    "{} predicted cluster id(s) not found in '{}': {}",
                    unmatched.len(),
                    self.grouping_key,
                    unmatched.join(", ")
                ),
            }
        }

        let cell_labels = groups
            .iter()
            .map(|group| identities.get(group).cloned())
            .collect();

        info!(
            "Merged {} cluster identities into '{}' of '{}'",
            identities.len(),
            self.grouping_key,
            data.name()
        );

        Ok(AnnotationOutcome {
            records,
            identities,
            unmatched,
            cell_labels,
        })
    }

    fn marker_table(&self) -> String {
        self.markers
            .truncated(self.top_n)
            .iter()
            .map(|(cluster, genes)| format!("{}: {}", cluster, genes.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl AnalysisPipeline for AnnotationPipeline {
    fn name(&self) -> &'static str {
        "annotate"
    }

    fn template(&self) -> TemplateKind {
        TemplateKind::AnnotateCluster
    }

    fn check_preconditions(&self, data: &dyn CellDataset) -> Result<()> {
        require_cells(data)?;
        let groups = require_grouping(data, &self.grouping_key)?;

        if self.markers.is_empty() {
            return Err(CellScribeError::Precondition(
                "no marker genes supplied; run differential expression per cluster first"
                    .to_string(),
            ));
        }

        let known: BTreeSet<&str> = groups.iter().map(String::as_str).collect();
        let missing: Vec<&str> = self
            .markers
            .cluster_ids()
            .filter(|id| !known.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(CellScribeError::Precondition(format!(
                "marker clusters {} are not labels of grouping '{}' in dataset '{}'",
                missing.join(", "),
                self.grouping_key,
                data.name()
            )));
        }
        Ok(())
    }

    fn prompt_fields(&self, _data: &dyn CellDataset) -> Result<PromptFields> {
        Ok(PromptFields::new()
            .with("n_clusters", self.markers.len())
            .with("species", &self.species)
            .with("tissue", &self.tissue)
            .with("marker_table", self.marker_table()))
    }

    fn parse(&self, parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
        parser
            .parse_annotation_table(raw, self.markers.len())
            .map(ParsedResult::Annotations)
    }
}
