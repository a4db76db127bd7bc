//! Enrichment summarisation.
//!
//! For each enabled source (KEGG first, then GO) the orchestrator asks for a
//! free-text summary of the term table and then for a gene/concept network
//! extracted from that summary. When both sources ran, their triples are
//! concatenated and one more call combines the two summaries.
//!
//! Stages run strictly in sequence since each prompt embeds the text of the
//! stage before it. The first failing stage aborts the run. With a checkpoint
//! path set, the session is written to disk after every completed stage and
//! a later run over the same input picks up where the last one stopped.

use crate::network::NetworkGraph;
use cellscribe_ai::{Dispatcher, NetworkTable, PromptFields, ResponseParser, TemplateKind};
use cellscribe_core::{
    BackendSelector, CellScribeError, EnrichmentConfig, EnrichmentSource, GenerationConfig,
    NetworkTriple, RawResponse, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One row of an enrichment result table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTerm {
    pub id: String,
    pub description: String,
    /// Adjusted p-value
    pub p_adjust: f64,
    pub gene_count: usize,
    #[serde(default)]
    pub genes: Vec<String>,
}

impl EnrichedTerm {
    fn table_row(&self) -> String {
        format!(
            "{} / {} / {:.2e} / {} / {}",
            self.id,
            self.description,
            self.p_adjust,
            self.gene_count,
            self.genes.join(", ")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrichmentThresholds {
    pub p_value_cutoff: f64,
    pub min_gene_count: usize,
    /// 0 keeps every passing term
    pub max_terms: usize,
}

impl Default for EnrichmentThresholds {
    fn default() -> Self {
        Self::from(&EnrichmentConfig::default())
    }
}

impl From<&EnrichmentConfig> for EnrichmentThresholds {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            p_value_cutoff: config.p_value_cutoff,
            min_gene_count: config.min_gene_count,
            max_terms: config.max_terms,
        }
    }
}

impl EnrichmentThresholds {
    /// Keep significant terms, most significant first
    pub fn apply(&self, terms: &[EnrichedTerm]) -> Vec<EnrichedTerm> {
        let mut kept: Vec<EnrichedTerm> = terms
            .iter()
            .filter(|term| term.p_adjust <= self.p_value_cutoff)
            .filter(|term| term.gene_count >= self.min_gene_count)
            .cloned()
            .collect();
        kept.sort_by(|a, b| a.p_adjust.total_cmp(&b.p_adjust));
        if self.max_terms > 0 {
            kept.truncate(self.max_terms);
        }
        kept
    }
}

/// Term tables for one gene set; `None` disables a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentInput {
    pub gene_set_description: String,
    #[serde(default)]
    pub kegg: Option<Vec<EnrichedTerm>>,
    #[serde(default)]
    pub go: Option<Vec<EnrichedTerm>>,
}

impl EnrichmentInput {
    pub fn new(gene_set_description: impl Into<String>) -> Self {
        Self {
            gene_set_description: gene_set_description.into(),
            kegg: None,
            go: None,
        }
    }

    pub fn with_kegg(mut self, terms: Vec<EnrichedTerm>) -> Self {
        self.kegg = Some(terms);
        self
    }

    pub fn with_go(mut self, terms: Vec<EnrichedTerm>) -> Self {
        self.go = Some(terms);
        self
    }

    /// Enabled sources in processing order
    pub fn sources(&self) -> Vec<EnrichmentSource> {
        let mut sources = Vec::with_capacity(2);
        if self.kegg.is_some() {
            sources.push(EnrichmentSource::Kegg);
        }
        if self.go.is_some() {
            sources.push(EnrichmentSource::Go);
        }
        sources
    }

    pub fn terms(&self, source: EnrichmentSource) -> Option<&[EnrichedTerm]> {
        match source {
            EnrichmentSource::Kegg => self.kegg.as_deref(),
            EnrichmentSource::Go => self.go.as_deref(),
        }
    }

    fn validate(&self) -> Result<()> {
        let sources = self.sources();
        if sources.is_empty() {
            return Err(CellScribeError::Precondition(
                "no enrichment source enabled; supply a KEGG or GO term table".to_string(),
            ));
        }
        for source in sources {
            if self.terms(source).is_some_and(|terms| terms.is_empty()) {
                return Err(CellScribeError::Precondition(format!(
                    "{} term table for '{}' is empty; run the enrichment test or relax the thresholds",
                    source, self.gene_set_description
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "source")]
pub enum EnrichmentStage {
    Start,
    Summarize(EnrichmentSource),
    ExtractNetwork(EnrichmentSource),
    CombineIfMultiple,
    OverallSummary,
    Done,
}

impl fmt::Display for EnrichmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrichmentStage::Start => write!(f, "START"),
            EnrichmentStage::Summarize(source) => write!(f, "SUMMARIZE({})", source),
            EnrichmentStage::ExtractNetwork(source) => write!(f, "EXTRACT_NETWORK({})", source),
            EnrichmentStage::CombineIfMultiple => write!(f, "COMBINE_IF_MULTIPLE"),
            EnrichmentStage::OverallSummary => write!(f, "OVERALL_SUMMARY"),
            EnrichmentStage::Done => write!(f, "DONE"),
        }
    }
}

/// What one source produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: EnrichmentSource,
    pub summary: String,
    /// `None` until network extraction has run; an empty table is a valid result
    pub network: Option<NetworkTable>,
}

impl SourceOutcome {
    pub fn triples(&self) -> &[NetworkTriple] {
        self.network
            .as_ref()
            .map(|table| table.triples.as_slice())
            .unwrap_or(&[])
    }
}

/// Progress of one enrichment run, serialisable as a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSession {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub input: EnrichmentInput,
    pub outcomes: Vec<SourceOutcome>,
    pub combined: Option<Vec<NetworkTriple>>,
    pub overall_summary: Option<String>,
    pub completed: Vec<EnrichmentStage>,
}

impl EnrichmentSession {
    pub fn new(input: EnrichmentInput) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            input,
            outcomes: Vec::new(),
            combined: None,
            overall_summary: None,
            completed: vec![EnrichmentStage::Start],
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write through a temporary file so a crash never leaves half a checkpoint
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn outcome(&self, source: EnrichmentSource) -> Option<&SourceOutcome> {
        self.outcomes.iter().find(|outcome| outcome.source == source)
    }

    /// First stage not yet completed
    pub fn next_stage(&self) -> EnrichmentStage {
        let sources = self.input.sources();
        for &source in &sources {
            match self.outcome(source) {
                None => return EnrichmentStage::Summarize(source),
                Some(outcome) if outcome.network.is_none() => {
                    return EnrichmentStage::ExtractNetwork(source)
                }
                Some(_) => {}
            }
        }

        if sources.len() > 1 {
            if self.combined.is_none() {
                return EnrichmentStage::CombineIfMultiple;
            }
            if self.overall_summary.is_none() {
                return EnrichmentStage::OverallSummary;
            }
        }
        EnrichmentStage::Done
    }

    fn record(&mut self, stage: EnrichmentStage) {
        self.completed.push(stage);
        self.updated_at = Utc::now();
    }

    fn summary_of(&self, source: EnrichmentSource) -> Result<&str> {
        self.outcome(source)
            .map(|outcome| outcome.summary.as_str())
            .ok_or_else(|| {
                CellScribeError::Precondition(format!("no {} summary recorded in this session", source))
            })
    }
}

/// Result of a completed enrichment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub session_id: Uuid,
    pub sources: Vec<SourceOutcome>,
    /// All triples of all sources, in source order
    pub triples: Vec<NetworkTriple>,
    /// Present only when more than one source ran
    pub overall_summary: Option<String>,
    pub stages: Vec<EnrichmentStage>,
    pub resumed: bool,
}

impl EnrichmentReport {
    fn from_session(session: EnrichmentSession, resumed: bool) -> Self {
        let triples = match session.combined {
            Some(triples) => triples,
            None => session
                .outcomes
                .iter()
                .flat_map(|outcome| outcome.triples().iter().cloned())
                .collect(),
        };

        Self {
            session_id: session.session_id,
            sources: session.outcomes,
            triples,
            overall_summary: session.overall_summary,
            stages: session.completed,
            resumed,
        }
    }

    pub fn summary(&self, source: EnrichmentSource) -> Option<&str> {
        self.sources
            .iter()
            .find(|outcome| outcome.source == source)
            .map(|outcome| outcome.summary.as_str())
    }

    /// Network rows dropped as malformed across all sources
    pub fn skipped_lines(&self) -> usize {
        self.sources
            .iter()
            .filter_map(|outcome| outcome.network.as_ref())
            .map(NetworkTable::skipped_count)
            .sum()
    }

    pub fn graph(&self) -> NetworkGraph {
        NetworkGraph::from_triples(&self.triples)
    }
}

pub struct EnrichmentOrchestrator {
    dispatcher: Dispatcher,
    parser: Arc<dyn ResponseParser>,
    checkpoint_path: Option<PathBuf>,
}

impl EnrichmentOrchestrator {
    pub fn new(dispatcher: Dispatcher, parser: Arc<dyn ResponseParser>) -> Self {
        Self {
            dispatcher,
            parser,
            checkpoint_path: None,
        }
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Checkpoint file for a gene set inside `dir`
    pub fn checkpoint_file(dir: &Path, gene_set_description: &str) -> PathBuf {
        let slug: String = gene_set_description
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        dir.join(format!("enrichment_{}.json", slug.trim_matches('_')))
    }

    pub async fn run(
        &self,
        input: EnrichmentInput,
        backend: BackendSelector,
        config: &GenerationConfig,
    ) -> Result<EnrichmentReport> {
        input.validate()?;
        config.validate()?;

        let (mut session, resumed) = self.open_session(input);
        info!(
            "Enrichment session {} for '{}' over {} source(s)",
            session.session_id,
            session.input.gene_set_description,
            session.input.sources().len()
        );

        loop {
            let stage = session.next_stage();
            if stage == EnrichmentStage::Done {
                break;
            }

            let outcome = match self.step(&mut session, stage, backend, config).await {
                Ok(()) => {
                    session.record(stage);
                    self.checkpoint(&session)
                }
                Err(e) => Err(e),
            };

            if let Err(reason) = outcome {
                warn!(
                    "Enrichment session {} aborted at {}: {}",
                    session.session_id, stage, reason
                );
                return Err(CellScribeError::EnrichmentAborted {
                    stage: stage.to_string(),
                    reason: Box::new(reason),
                });
            }
        }

        session.record(EnrichmentStage::Done);
        self.clear_checkpoint();

        let report = EnrichmentReport::from_session(session, resumed);
        info!(
            "Enrichment done: {} triple(s), {} malformed row(s) skipped",
            report.triples.len(),
            report.skipped_lines()
        );
        Ok(report)
    }

    async fn step(
        &self,
        session: &mut EnrichmentSession,
        stage: EnrichmentStage,
        backend: BackendSelector,
        config: &GenerationConfig,
    ) -> Result<()> {
        debug!("Entering stage {}", stage);
        match stage {
            EnrichmentStage::Summarize(source) => {
                let terms_table = session
                    .input
                    .terms(source)
                    .unwrap_or(&[])
                    .iter()
                    .map(EnrichedTerm::table_row)
                    .collect::<Vec<_>>()
                    .join("\n");
                let kind = match source {
                    EnrichmentSource::Kegg => TemplateKind::EnrichmentKegg,
                    EnrichmentSource::Go => TemplateKind::EnrichmentGo,
                };
                let fields = PromptFields::new()
                    .with("gene_set_description", &session.input.gene_set_description)
                    .with("terms_table", terms_table);

                let raw = self.call(kind, &fields, backend, config).await?;
                let summary = self.parser.parse_free_text(&raw)?;
                session.outcomes.push(SourceOutcome {
                    source,
                    summary,
                    network: None,
                });
            }
            EnrichmentStage::ExtractNetwork(source) => {
                let fields = PromptFields::new()
                    .with("source", source)
                    .with("summary_text", session.summary_of(source)?);

                let raw = self
                    .call(TemplateKind::NetworkExtraction, &fields, backend, config)
                    .await?;
                let table = self.parser.parse_network_table(&raw)?;
                if table.is_empty() {
                    info!("No relationships extracted from the {} summary", source);
                }
                if let Some(outcome) = session.outcomes.iter_mut().find(|o| o.source == source) {
                    outcome.network = Some(table);
                }
            }
            EnrichmentStage::CombineIfMultiple => {
                let combined = session
                    .outcomes
                    .iter()
                    .flat_map(|outcome| outcome.triples().iter().cloned())
                    .collect();
                session.combined = Some(combined);
            }
            EnrichmentStage::OverallSummary => {
                let fields = PromptFields::new()
                    .with("gene_set_description", &session.input.gene_set_description)
                    .with("kegg_summary", session.summary_of(EnrichmentSource::Kegg)?)
                    .with("go_summary", session.summary_of(EnrichmentSource::Go)?);

                let raw = self
                    .call(TemplateKind::EnrichmentOverall, &fields, backend, config)
                    .await?;
                session.overall_summary = Some(self.parser.parse_free_text(&raw)?);
            }
            EnrichmentStage::Start | EnrichmentStage::Done => {}
        }
        Ok(())
    }

    async fn call(
        &self,
        kind: TemplateKind,
        fields: &PromptFields,
        backend: BackendSelector,
        config: &GenerationConfig,
    ) -> Result<RawResponse> {
        self.dispatcher
            .dispatch(kind, fields, backend, config)
            .await?
            .ensure_success()
    }

    fn open_session(&self, input: EnrichmentInput) -> (EnrichmentSession, bool) {
        let Some(path) = self.checkpoint_path.as_deref().filter(|p| p.exists()) else {
            return (EnrichmentSession::new(input), false);
        };

        match EnrichmentSession::load(path) {
            Ok(session) if session.input == input => {
                info!(
                    "Resuming enrichment session {} at {}",
                    session.session_id,
                    session.next_stage()
                );
                (session, true)
            }
            Ok(session) => {
                warn!(
                    "Checkpoint {} holds session {} for different input; starting over",
                    path.display(),
                    session.session_id
                );
                (EnrichmentSession::new(input), false)
            }
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
                (EnrichmentSession::new(input), false)
            }
        }
    }

    fn checkpoint(&self, session: &EnrichmentSession) -> Result<()> {
        match &self.checkpoint_path {
            Some(path) => session.save(path),
            None => Ok(()),
        }
    }

    fn clear_checkpoint(&self) {
        if let Some(path) = self.checkpoint_path.as_deref().filter(|p| p.exists()) {
            if let Err(e) = fs::remove_file(path) {
                warn!("Failed to remove checkpoint {}: {}", path.display(), e);
            }
        }
    }
}
