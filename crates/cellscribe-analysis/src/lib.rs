pub mod dataset;
pub mod enrichment;
pub mod export;
pub mod network;
pub mod pipelines;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use dataset::{CellDataset, DatasetSummary, PcaResult, PrincipalComponent, VariableFeature};
pub use enrichment::{
    EnrichedTerm, EnrichmentInput, EnrichmentOrchestrator, EnrichmentReport, EnrichmentSession,
    EnrichmentStage, EnrichmentThresholds, SourceOutcome,
};
pub use network::{NetworkEdge, NetworkGraph, NetworkNode, NodeKind};
pub use pipelines::*;
pub use stats::DescriptiveSummary;
