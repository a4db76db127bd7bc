use super::{free_text, integer, AnalysisPipeline};
use crate::dataset::{require_pca, CellDataset};
use cellscribe_ai::{PromptFields, ResponseParser, TemplateKind};
use cellscribe_core::{ParsedResult, RawResponse, Result};

/// Interprets the biology behind the leading principal components
#[derive(Debug, Clone)]
pub struct PcsPipeline {
    pub n_components: usize,
    /// Loading genes listed per direction
    pub genes_per_side: usize,
}

impl Default for PcsPipeline {
    fn default() -> Self {
        Self {
            n_components: 5,
            genes_per_side: 10,
        }
    }
}

impl AnalysisPipeline for PcsPipeline {
    fn name(&self) -> &'static str {
        "pcs"
    }

    fn template(&self) -> TemplateKind {
        TemplateKind::Pcs
    }

    fn check_preconditions(&self, data: &dyn CellDataset) -> Result<()> {
        require_pca(data).map(|_| ())
    }

    fn prompt_fields(&self, data: &dyn CellDataset) -> Result<PromptFields> {
        let pca = require_pca(data)?;

        let pc_table = pca
            .components
            .iter()
            .take(self.n_components.max(1))
            .enumerate()
            .map(|(idx, pc)| {
                let positive: Vec<&str> =
                    pc.positive.iter().take(self.genes_per_side).map(String::as_str).collect();
                let negative: Vec<&str> =
                    pc.negative.iter().take(self.genes_per_side).map(String::as_str).collect();
                format!(
                    "PC{}: positive: {}; negative: {}",
                    idx + 1,
                    positive.join(", "),
                    negative.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(PromptFields::new()
            .with("dataset_name", data.name())
            .with("pc_table", pc_table))
    }

    fn parse(&self, parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
        free_text(parser, raw)
    }
}

/// Recommends how many principal components to carry forward
#[derive(Debug, Clone, Default)]
pub struct RecommendPcsPipeline;

impl AnalysisPipeline for RecommendPcsPipeline {
    fn name(&self) -> &'static str {
        "recommend_pcs"
    }

    fn template(&self) -> TemplateKind {
        TemplateKind::RecommendPcs
    }

    fn check_preconditions(&self, data: &dyn CellDataset) -> Result<()> {
        require_pca(data).map(|_| ())
    }

    fn prompt_fields(&self, data: &dyn CellDataset) -> Result<PromptFields> {
        let pca = require_pca(data)?;
        let explained = pca.variance_explained();

        let mut cumulative = 0.0;
        let mut rows = Vec::with_capacity(pca.components.len());
        for (idx, (pc, share)) in pca.components.iter().zip(&explained).enumerate() {
            cumulative += share;
            rows.push(format!(
                "PC{}: stdev {:.3}, {:.1}% of variance, {:.1}% cumulative",
                idx + 1,
                pc.stdev,
                share,
                cumulative
            ));
        }

        Ok(PromptFields::new()
            .with("dataset_name", data.name())
            .with("n_cells", data.cell_count())
            .with("stdev_table", rows.join("\n")))
    }

    fn parse(&self, parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
        integer(parser, raw)
    }
}
