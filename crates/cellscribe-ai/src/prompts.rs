// Prompt templates for every analysis the assistant can run.
// Output-shape instructions in these skeletons are relied upon by response_parser.

use cellscribe_core::{CellScribeError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::debug;

/// Number of leading lines the network-extraction answer spends on its table header
pub const NETWORK_HEADER_LINES: usize = 2;

/// Column names of the network-extraction table header
pub const NETWORK_HEADER_CELLS: [&str; 3] = ["Gene", "Relation", "Concept"];

const PREAMBLE: &str = "You are an expert in single-cell RNA-sequencing analysis \
assisting a researcher with a Seurat-style workflow. Be concise and follow the requested \
output format exactly.";

const QUALITY_TEMPLATE: &str = "{preamble}

Dataset '{dataset_name}' contains {n_cells} cells and {n_genes} genes.
Per-cell quality-control metrics (min / Q1 / median / mean / Q3 / max / sd):
- genes detected per cell (nFeature_RNA): {features_summary}
- UMI counts per cell (nCount_RNA): {counts_summary}
- mitochondrial read percentage (percent.mt): {mito_summary}

Recommend quality-control filtering thresholds for this dataset.
Provide the output as:
nFeature_RNA: min <value>, max <value>
nCount_RNA: min <value>, max <value>
percent.mt: max <value>
Reasoning: <one paragraph>";

const NORMALIZATION_TEMPLATE: &str = "{preamble}

Dataset '{dataset_name}' contains {n_cells} cells and {n_genes} genes.
Library size per cell (min / Q1 / median / mean / Q3 / max / sd): {library_size_summary}
Fraction of zero entries in the count matrix: {zero_fraction}

Choose a normalization method for this dataset (for example LogNormalize, SCTransform, \
or CLR) and a scale factor where applicable.
Provide the output as:
Method: <method>
Reasoning: <one paragraph>";

const VARIABLE_FEATURES_TEMPLATE: &str = "{preamble}

Dataset '{dataset_name}' has {n_variable_features} highly variable features.
The most variable features with their standardized variance are:
{top_features}

Interpret what these variable features suggest about the cell populations present.
Provide the output as:
Interpretation: <one paragraph>
Notable genes: <comma-separated genes>";

const PCS_TEMPLATE: &str = "{preamble}

Principal component analysis of dataset '{dataset_name}' produced these components, \
each listed with its highest positive and negative loading genes:
{pc_table}

Interpret the biological signal captured by each principal component.
Provide the output as one line per component:
PC<number>: <interpretation>";

const RECOMMEND_PCS_TEMPLATE: &str = "{preamble}

Dataset '{dataset_name}' contains {n_cells} cells. Standard deviation and share of \
variance explained for each computed principal component:
{stdev_table}

Recommend how many principal components to use for downstream clustering.
Start your answer with the recommended number alone, then explain.
Provide the output as:
<number>
Reasoning: <one paragraph>";

const K_PARAM_TEMPLATE: &str = "{preamble}

Dataset '{dataset_name}' contains {n_cells} cells and {n_pcs} principal components \
were computed. Distances from each cell to its nearest neighbors \
(min / Q1 / median / mean / Q3 / max / sd): {distance_summary}

Recommend the k parameter (number of nearest neighbors) for building the neighbor graph.
Start your answer with the recommended number alone, then explain.
Provide the output as:
<number>
Reasoning: <one paragraph>";

const RESOLUTION_TEMPLATE: &str = "{preamble}

Dataset '{dataset_name}' contains {n_cells} cells. A shared nearest-neighbor graph was \
built; neighbor distances (min / Q1 / median / mean / Q3 / max / sd): {distance_summary}
The researcher expects roughly: {expected_populations}

Recommend a clustering resolution for graph-based (Louvain/Leiden) clustering.
Provide the output as:
Resolution: <value>
Reasoning: <one paragraph>";

const ANNOTATE_CLUSTER_TEMPLATE: &str = "{preamble}

The following {n_clusters} clusters come from a {species} {tissue} sample. Each line \
lists the cluster id followed by its top marker genes ordered by effect size:
{marker_table}

Identify the most likely cell type of each cluster.
Provide the output as exactly one line per cluster, in the form
<cluster_id>:<cell type>:<reasoning>
Use the cluster ids exactly as given. Do not add any other text.";

const ENRICHMENT_KEGG_TEMPLATE: &str = "{preamble}

KEGG pathway enrichment for {gene_set_description} returned these significant pathways \
(id / description / adjusted p-value / gene count / genes):
{terms_table}

Summarize the biological processes these pathways point to, naming the genes involved.
Provide the output as a single paragraph.";

const ENRICHMENT_GO_TEMPLATE: &str = "{preamble}

Gene Ontology enrichment for {gene_set_description} returned these significant terms \
(id / description / adjusted p-value / gene count / genes):
{terms_table}

Summarize the biological processes these terms point to, naming the genes involved.
Provide the output as a single paragraph.";

const ENRICHMENT_OVERALL_TEMPLATE: &str = "{preamble}

Two summaries of pathway enrichment for {gene_set_description} follow.

KEGG summary:
{kegg_summary}

GO summary:
{go_summary}

Combine them into one overall interpretation, highlighting agreement and differences.
Provide the output as a single paragraph.";

const NETWORK_EXTRACTION_TEMPLATE: &str = "{preamble}

From the following {source} enrichment summary, extract every relationship between a \
single gene and either a biological concept or another gene.

Summary:
{summary_text}

Provide the output as a markdown table and nothing else. The first two lines must be \
exactly:
| Gene | Relation | Concept |
|---|---|---|
followed by one row per relationship, for example:
| G1 | Involved in | Metabolism |
| G3 | Interacts with | G5 |
Put exactly one gene symbol in the Gene column.";

/// Every prompt shape the assistant can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemplateKind {
    Quality,
    Normalization,
    VariableFeatures,
    Pcs,
    RecommendPcs,
    KParam,
    Resolution,
    AnnotateCluster,
    EnrichmentKegg,
    EnrichmentGo,
    EnrichmentOverall,
    NetworkExtraction,
}

impl TemplateKind {
    /// Get the string identifier for this template
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Quality => "quality",
            TemplateKind::Normalization => "normalization",
            TemplateKind::VariableFeatures => "variable_features",
            TemplateKind::Pcs => "pcs",
            TemplateKind::RecommendPcs => "recommend_pcs",
            TemplateKind::KParam => "k_param",
            TemplateKind::Resolution => "resolution",
            TemplateKind::AnnotateCluster => "annotate_cluster",
            TemplateKind::EnrichmentKegg => "enrichment_kegg",
            TemplateKind::EnrichmentGo => "enrichment_go",
            TemplateKind::EnrichmentOverall => "enrichment_overall",
            TemplateKind::NetworkExtraction => "network_extraction",
        }
    }

    /// Get all template kinds
    pub fn all() -> Vec<Self> {
        vec![
            TemplateKind::Quality,
            TemplateKind::Normalization,
            TemplateKind::VariableFeatures,
            TemplateKind::Pcs,
            TemplateKind::RecommendPcs,
            TemplateKind::KParam,
            TemplateKind::Resolution,
            TemplateKind::AnnotateCluster,
            TemplateKind::EnrichmentKegg,
            TemplateKind::EnrichmentGo,
            TemplateKind::EnrichmentOverall,
            TemplateKind::NetworkExtraction,
        ]
    }

    fn skeleton(&self) -> &'static str {
        match self {
            TemplateKind::Quality => QUALITY_TEMPLATE,
            TemplateKind::Normalization => NORMALIZATION_TEMPLATE,
            TemplateKind::VariableFeatures => VARIABLE_FEATURES_TEMPLATE,
            TemplateKind::Pcs => PCS_TEMPLATE,
            TemplateKind::RecommendPcs => RECOMMEND_PCS_TEMPLATE,
            TemplateKind::KParam => K_PARAM_TEMPLATE,
            TemplateKind::Resolution => RESOLUTION_TEMPLATE,
            TemplateKind::AnnotateCluster => ANNOTATE_CLUSTER_TEMPLATE,
            TemplateKind::EnrichmentKegg => ENRICHMENT_KEGG_TEMPLATE,
            TemplateKind::EnrichmentGo => ENRICHMENT_GO_TEMPLATE,
            TemplateKind::EnrichmentOverall => ENRICHMENT_OVERALL_TEMPLATE,
            TemplateKind::NetworkExtraction => NETWORK_EXTRACTION_TEMPLATE,
        }
    }

    /// Fields the caller must supply, in first-use order
    pub fn required_fields(&self) -> Vec<&'static str> {
        let mut seen = BTreeSet::new();
        placeholder_regex()
            .captures_iter(self.skeleton())
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .filter(|name| *name != "preamble")
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKind {
    type Err = CellScribeError;

    fn from_str(s: &str) -> Result<Self> {
        TemplateKind::all()
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CellScribeError::Config(format!("unknown template kind '{}'", s)))
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("static placeholder pattern"))
}

/// Named values substituted into a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptFields {
    values: BTreeMap<String, String>,
}

impl PromptFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.values.insert(name.into(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Renders templates into final prompt text
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    preamble: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            preamble: PREAMBLE.to_string(),
        }
    }

    /// Replace the shared system preamble
    pub fn with_preamble(preamble: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
        }
    }

    /// Render `kind` with `fields`. Pure; identical inputs give identical text.
    pub fn build(&self, kind: TemplateKind, fields: &PromptFields) -> Result<String> {
        if let Some(field) = kind
            .required_fields()
            .into_iter()
            .find(|field| fields.get(field).is_none())
        {
            return Err(CellScribeError::MissingField {
                template: kind.as_str().to_string(),
                field: field.to_string(),
            });
        }

        let rendered = placeholder_regex().replace_all(kind.skeleton(), |caps: &regex::Captures| {
            let name = &caps[1];
            if name == "preamble" {
                self.preamble.clone()
            } else {
                // Presence checked above
                fields.get(name).unwrap_or_default().to_string()
            }
        });

        debug!(
            "Built {} prompt ({} chars, {} fields)",
            kind,
            rendered.len(),
            fields.len()
        );

        Ok(rendered.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotate_fields() -> PromptFields {
        PromptFields::new()
            .with("n_clusters", 2)
            .with("species", "human")
            .with("tissue", "PBMC")
            .with("marker_table", "0: CD3E, CD3D\n1: MS4A1, CD79A")
    }

    #[test]
    fn test_every_template_builds_with_its_fields() {
        let builder = PromptBuilder::new();
        for kind in TemplateKind::all() {
            let fields = kind
                .required_fields()
                .into_iter()
                .fold(PromptFields::new(), |f, name| f.with(name, format!("<{}>", name)));
            let text = builder.build(kind, &fields).unwrap();
            assert!(text.starts_with("You are an expert"), "{} lacks preamble", kind);
            assert!(!placeholder_regex().is_match(&text), "{} left a placeholder", kind);
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = PromptBuilder::new();
        let a = builder.build(TemplateKind::AnnotateCluster, &annotate_fields()).unwrap();
        let b = builder.build(TemplateKind::AnnotateCluster, &annotate_fields()).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("<cluster_id>:<cell type>:<reasoning>"));
        assert!(a.contains("1: MS4A1, CD79A"));
    }

    #[test]
    fn test_missing_field_is_named() {
        let fields = PromptFields::new().with("species", "mouse");
        let err = PromptBuilder::new()
            .build(TemplateKind::AnnotateCluster, &fields)
            .unwrap_err();
        match err {
            CellScribeError::MissingField { template, field } => {
                assert_eq!(template, "annotate_cluster");
                assert_eq!(field, "n_clusters");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_values_with_braces_are_not_expanded() {
        let fields = PromptFields::new()
            .with("source", "KEGG")
            .with("summary_text", "literal {source} stays");
        let text = PromptBuilder::new()
            .build(TemplateKind::NetworkExtraction, &fields)
            .unwrap();
        assert!(text.contains("literal {source} stays"));
    }

    #[test]
    fn test_network_template_header_matches_skip_count() {
        let skeleton = TemplateKind::NetworkExtraction.skeleton();
        let header_start = skeleton.find("| Gene |").unwrap();
        let header: Vec<_> = skeleton[header_start..].lines().take(NETWORK_HEADER_LINES).collect();
        assert_eq!(header, vec!["| Gene | Relation | Concept |", "|---|---|---|"]);
        assert_eq!(
            header[0].trim_matches('|').split('|').map(str::trim).collect::<Vec<_>>(),
            NETWORK_HEADER_CELLS
        );
    }

    #[test]
    fn test_template_kind_round_trip() {
        for kind in TemplateKind::all() {
            assert_eq!(kind.as_str().parse::<TemplateKind>().unwrap(), kind);
        }
        assert!("nonsense".parse::<TemplateKind>().is_err());
    }

    #[test]
    fn test_custom_preamble() {
        let builder = PromptBuilder::with_preamble("Be brief.");
        let text = builder
            .build(
                TemplateKind::EnrichmentOverall,
                &PromptFields::new()
                    .with("gene_set_description", "cluster 3 markers")
                    .with("kegg_summary", "k")
                    .with("go_summary", "g"),
            )
            .unwrap();
        assert!(text.starts_with("Be brief."));
    }
}
