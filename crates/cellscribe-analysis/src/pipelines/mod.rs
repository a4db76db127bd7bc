//! Analysis pipelines.
//!
//! Each pipeline checks that the dataset carries the summary it needs, fills
//! one prompt template, and applies one parse shape to the answer. The
//! [`PipelineRunner`] drives all of them the same way.

pub mod annotate;
pub mod k_param;
pub mod normalization;
pub mod pcs;
pub mod quality;
pub mod resolution;
pub mod variable_features;

pub use annotate::{AnnotationOutcome, AnnotationPipeline, MergePolicy};
pub use k_param::KParamPipeline;
pub use normalization::NormalizationPipeline;
pub use pcs::{PcsPipeline, RecommendPcsPipeline};
pub use quality::QualityPipeline;
pub use resolution::ResolutionPipeline;
pub use variable_features::VariableFeaturesPipeline;

use crate::dataset::{require_qc_metric, CellDataset};
use crate::stats::DescriptiveSummary;
use cellscribe_ai::{Dispatcher, PromptFields, ResponseParser, TemplateKind};
use cellscribe_core::{
    BackendSelector, CellScribeError, GenerationConfig, ParsedResult, RawResponse, Result,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub trait AnalysisPipeline: Send + Sync {
    /// Short name used in logs and CLI output
    fn name(&self) -> &'static str;

    fn template(&self) -> TemplateKind;

    /// Fail with `Precondition` when an upstream step has not been run
    fn check_preconditions(&self, data: &dyn CellDataset) -> Result<()>;

    fn prompt_fields(&self, data: &dyn CellDataset) -> Result<PromptFields>;

    fn parse(&self, parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult>;
}

/// Runs pipelines against one dispatcher and one parser
#[derive(Clone)]
pub struct PipelineRunner {
    dispatcher: Dispatcher,
    parser: Arc<dyn ResponseParser>,
}

impl PipelineRunner {
    pub fn new(dispatcher: Dispatcher, parser: Arc<dyn ResponseParser>) -> Self {
        Self { dispatcher, parser }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn parser(&self) -> &dyn ResponseParser {
        self.parser.as_ref()
    }

    /// Preconditions, prompt, one dispatch, parse.
    ///
    /// A backend error ends the run before the parser is reached.
    pub async fn run(
        &self,
        pipeline: &dyn AnalysisPipeline,
        data: &dyn CellDataset,
        backend: BackendSelector,
        config: &GenerationConfig,
    ) -> Result<ParsedResult> {
        pipeline.check_preconditions(data)?;
        let fields = pipeline.prompt_fields(data)?;

        let start = Instant::now();
        let raw = self
            .dispatcher
            .dispatch(pipeline.template(), &fields, backend, config)
            .await?
            .ensure_success()?;
        debug!(
            "{} pipeline got an answer for '{}' in {}ms",
            pipeline.name(),
            data.name(),
            start.elapsed().as_millis()
        );

        let parsed = pipeline.parse(self.parser.as_ref(), &raw)?;
        info!("{} pipeline finished for '{}'", pipeline.name(), data.name());
        Ok(parsed)
    }
}

/// Descriptive summary of a QC metric, rendered for a prompt
pub(crate) fn metric_summary(data: &dyn CellDataset, metric: &str) -> Result<String> {
    let values = require_qc_metric(data, metric)?;
    finite_summary(data, metric, values)
}

pub(crate) fn finite_summary(data: &dyn CellDataset, what: &str, values: &[f64]) -> Result<String> {
    DescriptiveSummary::from_values(values)
        .map(|summary| summary.to_string())
        .ok_or_else(|| {
            CellScribeError::Precondition(format!(
                "dataset '{}' has no finite values for '{}'",
                data.name(),
                what
            ))
        })
}

pub(crate) fn free_text(parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
    parser.parse_free_text(raw).map(ParsedResult::FreeText)
}

pub(crate) fn integer(parser: &dyn ResponseParser, raw: &RawResponse) -> Result<ParsedResult> {
    parser
        .parse_integer(raw)
        .map(ParsedResult::IntegerRecommendation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetSummary;
    use crate::test_support::{config, local_dispatcher, parser, ScriptedBackend};
    use cellscribe_core::BackendErrorKind;

    fn clustered() -> DatasetSummary {
        DatasetSummary {
            name: "pbmc3k".to_string(),
            n_cells: 3,
            n_genes: 50,
            neighbor_distances: vec![1.0, 2.0, 3.0],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_backend_error_short_circuits_parse() {
        let local = ScriptedBackend::local(vec![RawResponse::backend_error(
            BackendErrorKind::Connection,
            "connection refused",
        )]);
        let runner = PipelineRunner::new(local_dispatcher(local.clone()), parser());

        let err = runner
            .run(
                &ResolutionPipeline::default(),
                &clustered(),
                BackendSelector::Local,
                &config(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.backend_kind(), Some(BackendErrorKind::Connection));
        assert_eq!(local.calls(), 1);
    }

    #[tokio::test]
    async fn test_precondition_failure_never_dispatches() {
        let local = ScriptedBackend::local(vec![RawResponse::success("Resolution: 0.8")]);
        let runner = PipelineRunner::new(local_dispatcher(local.clone()), parser());
        let mut data = clustered();
        data.neighbor_distances.clear();

        let err = runner
            .run(&ResolutionPipeline::default(), &data, BackendSelector::Local, &config())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no computed neighbor graph"));
        assert_eq!(local.calls(), 0);
    }
}
