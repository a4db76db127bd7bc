use super::{free_text, metric_summary, AnalysisPipeline};
use crate::dataset::{require_cells, require_qc_metric, CellDataset, COUNTS_METRIC};
use cellscribe_ai::{PromptFields, ResponseParser, TemplateKind};
use cellscribe_core::{ParsedResult, RawResponse, Result};

/// Suggests a normalization method from library sizes and sparsity
#[derive(Debug, Clone, Default)]
pub struct NormalizationPipeline;

impl AnalysisPipeline for NormalizationPipeline {
    fn name(&self) -> &'static str {
        "normalization"
    }

    fn template(&self) -> TemplateKind {
        TemplateKind::Normalization
    }

    fn check_preconditions(&self, data: &dyn CellDataset) -> Result<()> {
        require_cells(data)?;
        require_qc_metric(data, COUNTS_METRIC)?;
        Ok(())
    }

    fn prompt_fields(&self, data: &dyn CellDataset) -> Result<PromptFields> {
        let zero_fraction = match data.zero_fraction() {
            Some(fraction) => format!("{:.3}", fraction),
            None => "not computed".to_string(),
        };

        Ok(PromptFields::new()
            .with("dataset_name", data.name())
            .with("n_cells", data.cell_count())
            .with("n_genes", data.gene_count())
            .with("library_size_summary", metric_summary(data, COUNTS_METRIC)?)
            .with("zero_fraction", zero_fraction))
    }

    fn parse(&self, parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
        free_text(parser, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetSummary;

    #[test]
    fn test_zero_fraction_is_optional() {
        let mut data = DatasetSummary {
            name: "lung".to_string(),
            n_cells: 2,
            n_genes: 10,
            ..Default::default()
        };
        data.qc_metrics.insert(COUNTS_METRIC.into(), vec![100.0, 300.0]);

        let fields = NormalizationPipeline.prompt_fields(&data).unwrap();
        assert_eq!(fields.get("zero_fraction"), Some("not computed"));

        data.zero_fraction = Some(0.9312);
        let fields = NormalizationPipeline.prompt_fields(&data).unwrap();
        assert_eq!(fields.get("zero_fraction"), Some("0.931"));
    }

    #[test]
    fn test_requires_counts() {
        let data = DatasetSummary {
            name: "lung".to_string(),
            n_cells: 2,
            n_genes: 10,
            ..Default::default()
        };
        let err = NormalizationPipeline.check_preconditions(&data).unwrap_err();
        assert!(err.to_string().contains("nCount_RNA"));
    }
}
