use super::{free_text, AnalysisPipeline};
use crate::dataset::{require_variable_features, CellDataset};
use cellscribe_ai::{PromptFields, ResponseParser, TemplateKind};
use cellscribe_core::{ParsedResult, RawResponse, Result};

/// Interprets the most variable features of a dataset
#[derive(Debug, Clone)]
pub struct VariableFeaturesPipeline {
    /// How many of the top features go into the prompt
    pub top_n: usize,
}

impl Default for VariableFeaturesPipeline {
    fn default() -> Self {
        Self { top_n: 20 }
    }
}

impl VariableFeaturesPipeline {
    pub fn new(top_n: usize) -> Self {
        Self { top_n: top_n.max(1) }
    }
}

impl AnalysisPipeline for VariableFeaturesPipeline {
    fn name(&self) -> &'static str {
        "variable_features"
    }

    fn template(&self) -> TemplateKind {
        TemplateKind::VariableFeatures
    }

    fn check_preconditions(&self, data: &dyn CellDataset) -> Result<()> {
        require_variable_features(data).map(|_| ())
    }

    fn prompt_fields(&self, data: &dyn CellDataset) -> Result<PromptFields> {
        let features = require_variable_features(data)?;

        let mut ranked: Vec<_> = features.iter().collect();
        ranked.sort_by(|a, b| b.variance.total_cmp(&a.variance));

        let top_features = ranked
            .iter()
            .take(self.top_n)
            .map(|feature| format!("{} ({:.3})", feature.gene, feature.variance))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(PromptFields::new()
            .with("dataset_name", data.name())
            .with("n_variable_features", features.len())
            .with("top_features", top_features))
    }

    fn parse(&self, parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
        free_text(parser, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetSummary, VariableFeature};

    #[test]
    fn test_top_features_sorted_by_variance() {
        let data = DatasetSummary {
            name: "pbmc3k".to_string(),
            n_cells: 100,
            n_genes: 2000,
            variable_features: vec![
                VariableFeature { gene: "LYZ".into(), variance: 8.5 },
                VariableFeature { gene: "PPBP".into(), variance: 41.2 },
                VariableFeature { gene: "S100A9".into(), variance: 12.0 },
            ],
            ..Default::default()
        };

        let fields = VariableFeaturesPipeline::new(2).prompt_fields(&data).unwrap();
        assert_eq!(fields.get("n_variable_features"), Some("3"));
        assert_eq!(fields.get("top_features"), Some("PPBP (41.200)\nS100A9 (12.000)"));
    }
}
