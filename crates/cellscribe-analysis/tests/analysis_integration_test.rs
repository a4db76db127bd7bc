use async_trait::async_trait;
use cellscribe_ai::{BackendClient, BackendSet, Dispatcher, LenientParser};
use cellscribe_analysis::export::{write_annotation_tsv, write_network_tsv};
use cellscribe_analysis::{
    AnnotationPipeline, DatasetSummary, EnrichedTerm, EnrichmentInput, EnrichmentOrchestrator,
    EnrichmentThresholds, KParamPipeline, PipelineRunner,
};
use cellscribe_core::{
    BackendErrorKind, BackendSelector, Credential, GenerationConfig, PromptRequest, RawResponse,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Replay {
    answers: Mutex<VecDeque<&'static str>>,
    calls: AtomicUsize,
}

impl Replay {
    fn new(answers: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl BackendClient for Replay {
    async fn send(&self, _request: &PromptRequest, _credential: Option<&Credential>) -> RawResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answers.lock().unwrap().pop_front() {
            Some(text) => RawResponse::success(text),
            None => RawResponse::backend_error(BackendErrorKind::Connection, "connection refused"),
        }
    }

    async fn is_available(&self, _credential: Option<&Credential>) -> bool {
        true
    }

    fn backend(&self) -> BackendSelector {
        BackendSelector::Local
    }

    fn provider_name(&self) -> &str {
        "replay"
    }
}

fn dispatcher(local: Arc<Replay>) -> Dispatcher {
    Dispatcher::new(BackendSet::new(Replay::new(Vec::new()), local))
}

fn generation() -> GenerationConfig {
    GenerationConfig::new("llama3.1", 0.0, 512, 7)
}

const DATASET: &str = r#"{
    "name": "pbmc3k",
    "n_cells": 6,
    "n_genes": 13714,
    "pca": {"components": [{"stdev": 5.1}, {"stdev": 3.2}, {"stdev": 1.1}]},
    "neighbor_distances": [0.4, 0.5, 0.6, 0.8, 1.0, 1.3],
    "groupings": {"seurat_clusters": ["0", "0", "1", "1", "2", "2"]}
}"#;

#[tokio::test]
async fn test_dataset_file_drives_k_param_and_annotation() {
    let dir = TempDir::new().unwrap();
    let dataset_path = dir.path().join("pbmc3k.json");
    std::fs::write(&dataset_path, DATASET).unwrap();
    let data = DatasetSummary::from_json_file(&dataset_path).unwrap();

    let local = Replay::new(vec![
        "20\nReasoning: about 3000 cells",
        "- 0:T cells:CD3D\n- 1:Monocytes:LYZ\n- 2:B cells:MS4A1",
    ]);
    let runner = PipelineRunner::new(dispatcher(local.clone()), Arc::new(LenientParser::new()));

    let k = runner
        .run(&KParamPipeline, &data, BackendSelector::Local, &generation())
        .await
        .unwrap();
    assert_eq!(k.as_integer().unwrap().value, 20);

    let markers = serde_json::from_str(
        r#"{"0": ["CD3D", "IL7R"], "1": ["LYZ", "CD14"], "2": ["MS4A1"]}"#,
    )
    .unwrap();
    let outcome = AnnotationPipeline::new(markers, "human", "PBMC", "seurat_clusters")
        .annotate(&runner, &data, BackendSelector::Local, &generation())
        .await
        .unwrap();
    assert_eq!(outcome.cell_labels[4].as_deref(), Some("B cells"));

    let tsv = dir.path().join("annotations.tsv");
    write_annotation_tsv(&tsv, &outcome.records).unwrap();
    let content = std::fs::read_to_string(&tsv).unwrap();
    assert_eq!(content.lines().count(), 4);
    assert_eq!(content.lines().nth(2), Some("1\tMonocytes\tLYZ"));
    assert_eq!(local.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_enrichment_tables_from_json_to_network_tsv() {
    let kegg: Vec<EnrichedTerm> = serde_json::from_str(
        r#"[
            {"id": "hsa04110", "description": "Cell cycle", "p_adjust": 0.0001, "gene_count": 4,
             "genes": ["CDK1", "CCNB1", "MCM2", "PCNA"]},
            {"id": "hsa03030", "description": "DNA replication", "p_adjust": 0.3, "gene_count": 2}
        ]"#,
    )
    .unwrap();
    let kegg = EnrichmentThresholds::default().apply(&kegg);
    assert_eq!(kegg.len(), 1);

    let local = Replay::new(vec![
        "CDK1 and CCNB1 drive the G2/M transition.",
        "| Gene | Relation | Concept |\n|---|---|---|\n| CDK1 | Drives | G2/M transition |\n| CCNB1 | Binds | CDK1 |",
    ]);
    let orchestrator =
        EnrichmentOrchestrator::new(dispatcher(local.clone()), Arc::new(LenientParser::new()));

    let report = orchestrator
        .run(
            EnrichmentInput::new("cluster 4 markers").with_kegg(kegg),
            BackendSelector::Local,
            &generation(),
        )
        .await
        .unwrap();

    let graph = report.graph();
    assert_eq!(graph.edge_count(), 2);
    assert_eq!(graph.genes().count(), 2);

    let dir = TempDir::new().unwrap();
    let tsv = dir.path().join("network.tsv");
    write_network_tsv(&tsv, &report.triples).unwrap();
    let content = std::fs::read_to_string(&tsv).unwrap();
    assert!(content.ends_with("CCNB1\tBinds\tCDK1\n"));
}
