use super::{finite_summary, integer, AnalysisPipeline};
use crate::dataset::{require_neighbor_graph, require_pca, CellDataset};
use cellscribe_ai::{PromptFields, ResponseParser, TemplateKind};
use cellscribe_core::{ParsedResult, RawResponse, Result};

/// Recommends the k parameter for neighbor-graph construction
#[derive(Debug, Clone, Default)]
pub struct KParamPipeline;

impl AnalysisPipeline for KParamPipeline {
    fn name(&self) -> &'static str {
        "k_param"
    }

    fn template(&self) -> TemplateKind {
        TemplateKind::KParam
    }

    fn check_preconditions(&self, data: &dyn CellDataset) -> Result<()> {
        require_pca(data)?;
        require_neighbor_graph(data)?;
        Ok(())
    }

    fn prompt_fields(&self, data: &dyn CellDataset) -> Result<PromptFields> {
        let pca = require_pca(data)?;
        let distances = require_neighbor_graph(data)?;

        Ok(PromptFields::new()
            .with("dataset_name", data.name())
            .with("n_cells", data.cell_count())
            .with("n_pcs", pca.components.len())
            .with("distance_summary", finite_summary(data, "neighbor distances", distances)?))
    }

    fn parse(&self, parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
        integer(parser, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetSummary, PcaResult, PrincipalComponent};
    use crate::pipelines::PipelineRunner;
    use crate::test_support::{config, local_dispatcher, parser, ScriptedBackend};
    use cellscribe_core::BackendSelector;

    fn graph_ready() -> DatasetSummary {
        DatasetSummary {
            name: "retina".to_string(),
            n_cells: 5,
            n_genes: 100,
            pca: Some(PcaResult {
                components: vec![PrincipalComponent {
                    stdev: 2.0,
                    positive: Vec::new(),
                    negative: Vec::new(),
                }],
            }),
            neighbor_distances: vec![0.5, 0.7, 0.9, 1.1, 1.3],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_non_numeric_answer_degrades_to_sentinel() {
        let local = ScriptedBackend::local(vec![RawResponse::success(
            "A moderate neighborhood size works well here.",
        )]);
        let runner = PipelineRunner::new(local_dispatcher(local), parser());

        let result = runner
            .run(&KParamPipeline, &graph_ready(), BackendSelector::Local, &config())
            .await
            .unwrap();

        let rec = result.as_integer().unwrap();
        assert!(rec.is_sentinel());
        assert!(rec.warning.is_some());
    }

    #[test]
    fn test_needs_neighbor_graph() {
        let mut data = graph_ready();
        data.neighbor_distances.clear();
        let err = KParamPipeline.check_preconditions(&data).unwrap_err();
        assert!(err.to_string().contains("neighbor graph"));

        let fields = KParamPipeline.prompt_fields(&graph_ready()).unwrap();
        assert_eq!(fields.get("n_pcs"), Some("1"));
    }
}
