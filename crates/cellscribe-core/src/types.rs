use crate::error::{BackendErrorKind, CellScribeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which LLM backend serves a top-level invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelector {
    /// Remote generation API, requires a credential
    Hosted,
    /// Locally served model, no credential
    Local,
}

impl BackendSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendSelector::Hosted => "hosted",
            BackendSelector::Local => "local",
        }
    }

    pub fn requires_credential(&self) -> bool {
        matches!(self, BackendSelector::Hosted)
    }
}

impl fmt::Display for BackendSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendSelector {
    type Err = CellScribeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hosted" => Ok(BackendSelector::Hosted),
            "local" => Ok(BackendSelector::Local),
            _ => Err(CellScribeError::InvalidBackend(s.to_string())),
        }
    }
}

/// Sampling parameters for one backend call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature in [0, 1]
    pub temperature: f32,
    /// Upper bound on generated tokens
    pub max_output_tokens: u32,
    /// Fixed seed for reproducible sampling
    pub seed: i64,
    /// Model identifier passed to the backend
    pub model_id: String,
}

impl GenerationConfig {
    pub fn new(model_id: impl Into<String>, temperature: f32, max_output_tokens: u32, seed: i64) -> Self {
        Self {
            temperature,
            max_output_tokens,
            seed,
            model_id: model_id.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(CellScribeError::Config(format!(
                "temperature {} is outside [0, 1]",
                self.temperature
            )));
        }
        if self.max_output_tokens == 0 {
            return Err(CellScribeError::Config(
                "max_output_tokens must be positive".to_string(),
            ));
        }
        if self.model_id.trim().is_empty() {
            return Err(CellScribeError::Config("model_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// One rendered prompt and the configuration it is sent with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub text: String,
    pub config: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ResponseStatus {
    Success,
    BackendError {
        kind: BackendErrorKind,
        message: String,
    },
}

/// Unparsed backend output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub text: Option<String>,
    pub status: ResponseStatus,
}

impl RawResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            status: ResponseStatus::Success,
        }
    }

    pub fn backend_error(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            text: None,
            status: ResponseStatus::BackendError {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ResponseStatus::Success)
    }

    /// Turn a backend error into a `CellScribeError::Backend`, pass successes through.
    pub fn ensure_success(self) -> Result<Self> {
        match &self.status {
            ResponseStatus::Success => Ok(self),
            ResponseStatus::BackendError { kind, message } => {
                Err(CellScribeError::backend(*kind, message.clone()))
            }
        }
    }

    /// Text payload of a successful response.
    pub fn success_text(&self) -> Result<&str> {
        match &self.status {
            ResponseStatus::Success => Ok(self.text.as_deref().unwrap_or("")),
            ResponseStatus::BackendError { kind, message } => {
                Err(CellScribeError::backend(*kind, message.clone()))
            }
        }
    }
}

/// One `cluster:label:reasoning` line of an annotation answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub cluster_id: String,
    pub label: String,
    pub reasoning: String,
}

/// One `gene | relation | concept` row of an extracted network
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkTriple {
    pub subject_gene: String,
    pub relation: String,
    pub object: String,
}

impl NetworkTriple {
    pub fn new(
        subject_gene: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject_gene: subject_gene.into(),
            relation: relation.into(),
            object: object.into(),
        }
    }
}

/// A numeric recommendation pulled out of free text.
///
/// `value` is 0 when nothing usable was found; `warning` then says why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegerRecommendation {
    pub value: u32,
    pub warning: Option<String>,
}

impl IntegerRecommendation {
    pub fn is_sentinel(&self) -> bool {
        self.value == 0
    }
}

/// Structured result of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ParsedResult {
    FreeText(String),
    IntegerRecommendation(IntegerRecommendation),
    Annotations(Vec<AnnotationRecord>),
    Network(Vec<NetworkTriple>),
}

impl ParsedResult {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParsedResult::FreeText(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&IntegerRecommendation> {
        match self {
            ParsedResult::IntegerRecommendation(rec) => Some(rec),
            _ => None,
        }
    }

    pub fn as_annotations(&self) -> Option<&[AnnotationRecord]> {
        match self {
            ParsedResult::Annotations(records) => Some(records),
            _ => None,
        }
    }
}

/// Top marker genes per cluster, ordered by effect size
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterMarkerSet {
    clusters: BTreeMap<String, Vec<String>>,
}

impl ClusterMarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cluster_id: impl Into<String>, genes: Vec<String>) {
        self.clusters.insert(cluster_id.into(), genes);
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn contains(&self, cluster_id: &str) -> bool {
        self.clusters.contains_key(cluster_id)
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.clusters
            .iter()
            .map(|(id, genes)| (id.as_str(), genes.as_slice()))
    }

    /// Keep at most `n` genes per cluster.
    pub fn truncated(&self, n: usize) -> Self {
        Self {
            clusters: self
                .clusters
                .iter()
                .map(|(id, genes)| (id.clone(), genes.iter().take(n).cloned().collect()))
                .collect(),
        }
    }
}

impl FromIterator<(String, Vec<String>)> for ClusterMarkerSet {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self {
            clusters: iter.into_iter().collect(),
        }
    }
}

/// Pathway database an enrichment table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnrichmentSource {
    Kegg,
    Go,
}

impl EnrichmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentSource::Kegg => "KEGG",
            EnrichmentSource::Go => "GO",
        }
    }
}

impl fmt::Display for EnrichmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_selector_parsing() {
        assert_eq!("hosted".parse::<BackendSelector>().unwrap(), BackendSelector::Hosted);
        assert_eq!(" Local ".parse::<BackendSelector>().unwrap(), BackendSelector::Local);

        let err = "openai".parse::<BackendSelector>().unwrap_err();
        assert!(matches!(err, CellScribeError::InvalidBackend(ref name) if name == "openai"));
    }

    #[test]
    fn test_generation_config_validation() {
        assert!(GenerationConfig::new("m", 0.2, 512, 42).validate().is_ok());
        assert!(GenerationConfig::new("m", 1.5, 512, 42).validate().is_err());
        assert!(GenerationConfig::new("m", 0.2, 0, 42).validate().is_err());
        assert!(GenerationConfig::new(" ", 0.2, 16, 42).validate().is_err());
    }

    #[test]
    fn test_raw_response_error_never_yields_text() {
        let raw = RawResponse::backend_error(BackendErrorKind::Connection, "refused");
        assert!(!raw.is_success());
        assert!(raw.success_text().is_err());

        let err = raw.ensure_success().unwrap_err();
        assert_eq!(err.backend_kind(), Some(BackendErrorKind::Connection));
    }

    #[test]
    fn test_marker_set_truncation_keeps_order() {
        let mut markers = ClusterMarkerSet::new();
        markers.insert("0", vec!["CD3E".into(), "CD3D".into(), "IL7R".into()]);
        markers.insert("1", vec!["MS4A1".into()]);

        let top = markers.truncated(2);
        let first: Vec<_> = top.iter().next().unwrap().1.to_vec();
        assert_eq!(first, vec!["CD3E".to_string(), "CD3D".to_string()]);
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn test_marker_set_json_shape() {
        let markers: ClusterMarkerSet =
            serde_json::from_str(r#"{"0": ["CD3E"], "1": ["MS4A1", "CD79A"]}"#).unwrap();
        assert!(markers.contains("1"));
        assert_eq!(markers.cluster_ids().collect::<Vec<_>>(), vec!["0", "1"]);
    }
}
