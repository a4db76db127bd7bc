use super::{finite_summary, free_text, AnalysisPipeline};
use crate::dataset::{require_neighbor_graph, CellDataset};
use cellscribe_ai::{PromptFields, ResponseParser, TemplateKind};
use cellscribe_core::{ParsedResult, RawResponse, Result};

/// Recommends a clustering resolution.
///
/// The answer is kept as free text since the value is fractional and
/// usually comes with a range.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPipeline {
    /// Researcher's expectation of the populations present, if any
    pub expected_populations: Option<String>,
}

impl ResolutionPipeline {
    pub fn with_expected_populations(expected: impl Into<String>) -> Self {
        Self {
            expected_populations: Some(expected.into()),
        }
    }
}

impl AnalysisPipeline for ResolutionPipeline {
    fn name(&self) -> &'static str {
        "resolution"
    }

    fn template(&self) -> TemplateKind {
        TemplateKind::Resolution
    }

    fn check_preconditions(&self, data: &dyn CellDataset) -> Result<()> {
        require_neighbor_graph(data).map(|_| ())
    }

    fn prompt_fields(&self, data: &dyn CellDataset) -> Result<PromptFields> {
        let distances = require_neighbor_graph(data)?;
        let expected = self
            .expected_populations
            .as_deref()
            .unwrap_or("no prior expectation given");

        Ok(PromptFields::new()
            .with("dataset_name", data.name())
            .with("n_cells", data.cell_count())
            .with("distance_summary", finite_summary(data, "neighbor distances", distances)?)
            .with("expected_populations", expected))
    }

    fn parse(&self, parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
        free_text(parser, raw)
    }
}
