use super::{free_text, metric_summary, AnalysisPipeline};
use crate::dataset::{require_cells, require_qc_metric, CellDataset, COUNTS_METRIC, FEATURES_METRIC, MITO_METRIC};
use cellscribe_ai::{PromptFields, ResponseParser, TemplateKind};
use cellscribe_core::{ParsedResult, RawResponse, Result};

/// Recommends QC filtering thresholds from per-cell metrics
#[derive(Debug, Clone, Default)]
pub struct QualityPipeline;

impl AnalysisPipeline for QualityPipeline {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn template(&self) -> TemplateKind {
        TemplateKind::Quality
    }

    fn check_preconditions(&self, data: &dyn CellDataset) -> Result<()> {
        require_cells(data)?;
        for metric in [FEATURES_METRIC, COUNTS_METRIC, MITO_METRIC] {
            require_qc_metric(data, metric)?;
        }
        Ok(())
    }

    fn prompt_fields(&self, data: &dyn CellDataset) -> Result<PromptFields> {
        Ok(PromptFields::new()
            .with("dataset_name", data.name())
            .with("n_cells", data.cell_count())
            .with("n_genes", data.gene_count())
            .with("features_summary", metric_summary(data, FEATURES_METRIC)?)
            .with("counts_summary", metric_summary(data, COUNTS_METRIC)?)
            .with("mito_summary", metric_summary(data, MITO_METRIC)?))
    }

    fn parse(&self, parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
        free_text(parser, raw)
    }
}
