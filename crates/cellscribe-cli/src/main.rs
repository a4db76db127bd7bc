use anyhow::{Context, Result};
use cellscribe_ai::{Dispatcher, LenientParser, ResponseParser};
use cellscribe_analysis::export::{write_annotation_tsv, write_network_tsv};
use cellscribe_analysis::{
    AnalysisPipeline, AnnotationPipeline, CellDataset, DatasetSummary, EnrichedTerm,
    EnrichmentInput, EnrichmentOrchestrator, EnrichmentThresholds, KParamPipeline, MergePolicy,
    NormalizationPipeline, PcsPipeline, PipelineRunner, QualityPipeline, RecommendPcsPipeline,
    ResolutionPipeline, VariableFeaturesPipeline,
};
use cellscribe_core::{
    BackendSelector, CellScribeConfig, ClusterMarkerSet, ConfigManager, GenerationConfig,
    LoggingConfig, ParsedResult,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Parser)]
#[command(name = "cellscribe")]
#[command(about = "CellScribe - LLM-assisted single-cell RNA-seq analysis", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    format: OutputFormat,

    /// Configuration file (defaults to .cellscribe.toml lookup)
    #[arg(short, long, global = true, env = "CELLSCRIBE_CONFIG")]
    config: Option<PathBuf>,

    /// LLM backend: hosted or local
    #[arg(short, long, global = true)]
    backend: Option<String>,

    /// Model identifier for the selected backend
    #[arg(long, global = true)]
    model: Option<String>,

    /// Sampling seed
    #[arg(long, global = true)]
    seed: Option<i64>,

    /// Sampling temperature in [0, 1]
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Output token budget
    #[arg(long, global = true)]
    max_output_tokens: Option<u32>,

    /// File holding the hosted backend API key
    #[arg(long, global = true)]
    credential_path: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend QC filtering thresholds
    Quality {
        #[arg(short, long)]
        dataset: PathBuf,
    },

    /// Recommend a normalization method
    Normalization {
        #[arg(short, long)]
        dataset: PathBuf,
    },

    /// Interpret highly variable features
    VariableFeatures {
        #[arg(short, long)]
        dataset: PathBuf,

        /// Number of top features sent to the model
        #[arg(long, default_value = "20")]
        top_n: usize,
    },

    /// Interpret principal components
    Pcs {
        #[arg(short, long)]
        dataset: PathBuf,

        /// Number of components to interpret
        #[arg(long, default_value = "5")]
        components: usize,

        /// Loading genes listed per direction
        #[arg(long, default_value = "10")]
        genes_per_side: usize,
    },

    /// Recommend how many principal components to use
    RecommendPcs {
        #[arg(short, long)]
        dataset: PathBuf,
    },

    /// Recommend the k parameter for the neighbor graph
    KParam {
        #[arg(short, long)]
        dataset: PathBuf,
    },

    /// Recommend a clustering resolution
    Resolution {
        #[arg(short, long)]
        dataset: PathBuf,

        /// Expected populations, e.g. "T, B, NK cells and monocytes"
        #[arg(long)]
        expected: Option<String>,
    },

    /// Annotate clusters with cell types
    Annotate {
        #[arg(short, long)]
        dataset: PathBuf,

        /// JSON object mapping cluster id to ordered marker genes
        #[arg(short, long)]
        markers: PathBuf,

        #[arg(long, default_value = "human")]
        species: String,

        #[arg(long)]
        tissue: String,

        /// Metadata column holding each cell's cluster
        #[arg(long, default_value = "seurat_clusters")]
        grouping_key: String,

        /// Marker genes per cluster sent to the model
        #[arg(long, default_value = "10")]
        top_n: usize,

        /// Merge what matches instead of failing on unknown cluster ids
        #[arg(long)]
        report_unmatched: bool,

        /// Write annotation records as TSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize KEGG/GO enrichment and extract a gene network
    Enrich {
        /// Gene set the tables were computed for, e.g. "cluster 2 markers"
        #[arg(long)]
        description: String,

        /// JSON array of KEGG terms
        #[arg(long)]
        kegg: Option<PathBuf>,

        /// JSON array of GO terms
        #[arg(long)]
        go: Option<PathBuf>,

        /// Send tables as given, without p-value and size filtering
        #[arg(long)]
        no_filter: bool,

        /// Write the network triples as TSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a default configuration file
    InitConfig {
        #[arg(default_value = ".cellscribe.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check whether the selected backend is reachable
    CheckBackend,
}

#[derive(Serialize)]
struct PipelineResult {
    pipeline: String,
    dataset: String,
    backend: String,
    result: ParsedResult,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // init-config must work without a readable configuration
    if let Commands::InitConfig { path, force } = &cli.command {
        return run_and_print(&cli.format, init_config(path, *force));
    }

    let config = load_config(&cli)?;
    init_tracing(&config.logging, cli.verbose);

    let output = execute_command(&cli, &config).await;
    run_and_print(&cli.format, output)
}

fn run_and_print(format: &OutputFormat, output: Result<serde_json::Value>) -> Result<()> {
    match output {
        Ok(value) => {
            print_output(format, &value)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<CellScribeConfig> {
    let manager = ConfigManager::load_with(cli.config.as_deref(), |config| {
        apply_cli_overrides(config, cli)
    })
    .context("Failed to load configuration")?;

    Ok(manager.config().clone())
}

fn apply_cli_overrides(config: &mut CellScribeConfig, cli: &Cli) {
    if let Some(backend) = &cli.backend {
        config.llm.backend = backend.clone();
    }
    if let Some(model) = &cli.model {
        config.llm.model = Some(model.clone());
    }
    if let Some(seed) = cli.seed {
        config.llm.seed = seed;
    }
    if let Some(temperature) = cli.temperature {
        config.llm.temperature = temperature;
    }
    if let Some(tokens) = cli.max_output_tokens {
        config.llm.max_output_tokens = tokens;
    }
    if let Some(path) = &cli.credential_path {
        config.llm.hosted.credential_path = Some(path.clone());
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());

    // Logs go to stderr so JSON output on stdout stays parseable
    let fmt_layer = match logging.format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        "compact" => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

async fn execute_command(cli: &Cli, config: &CellScribeConfig) -> Result<serde_json::Value> {
    let backend = config.llm.selector()?;
    let generation = config.llm.generation_config(backend);
    let dispatcher = Dispatcher::from_config(&config.llm).context("Failed to create backend clients")?;
    let parser: Arc<dyn ResponseParser> = Arc::new(LenientParser::new());
    let runner = PipelineRunner::new(dispatcher.clone(), parser.clone());

    debug!(
        "Using {} backend, model {}, seed {}, temperature {}",
        backend, generation.model_id, generation.seed, generation.temperature
    );

    match &cli.command {
        Commands::Quality { dataset } => {
            run_pipeline(&runner, &QualityPipeline, dataset, backend, &generation).await
        }
        Commands::Normalization { dataset } => {
            run_pipeline(&runner, &NormalizationPipeline, dataset, backend, &generation).await
        }
        Commands::VariableFeatures { dataset, top_n } => {
            let pipeline = VariableFeaturesPipeline::new(*top_n);
            run_pipeline(&runner, &pipeline, dataset, backend, &generation).await
        }
        Commands::Pcs {
            dataset,
            components,
            genes_per_side,
        } => {
            let pipeline = PcsPipeline {
                n_components: *components,
                genes_per_side: *genes_per_side,
            };
            run_pipeline(&runner, &pipeline, dataset, backend, &generation).await
        }
        Commands::RecommendPcs { dataset } => {
            run_pipeline(&runner, &RecommendPcsPipeline, dataset, backend, &generation).await
        }
        Commands::KParam { dataset } => {
            run_pipeline(&runner, &KParamPipeline, dataset, backend, &generation).await
        }
        Commands::Resolution { dataset, expected } => {
            let pipeline = ResolutionPipeline {
                expected_populations: expected.clone(),
            };
            run_pipeline(&runner, &pipeline, dataset, backend, &generation).await
        }
        Commands::Annotate {
            dataset,
            markers,
            species,
            tissue,
            grouping_key,
            top_n,
            report_unmatched,
            output,
        } => {
            let data = load_dataset(dataset)?;
            let markers: ClusterMarkerSet = read_json(markers, "marker genes")?;
            let policy = if *report_unmatched {
                MergePolicy::ReportUnmatched
            } else {
                MergePolicy::Strict
            };
            let pipeline = AnnotationPipeline::new(markers, species, tissue, grouping_key)
                .with_top_n(*top_n)
                .with_merge_policy(policy);

            let outcome = pipeline
                .annotate(&runner, &data, backend, &generation)
                .await
                .with_context(|| format!("Annotation of '{}' failed", data.name()))?;

            if let Some(path) = output {
                write_annotation_tsv(path, &outcome.records)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }

            Ok(serde_json::json!({
                "dataset": data.name(),
                "backend": backend.as_str(),
                "identities": outcome.identities,
                "unmatched": outcome.unmatched,
                "records": outcome.records,
            }))
        }
        Commands::Enrich {
            description,
            kegg,
            go,
            no_filter,
            output,
        } => {
            let thresholds = EnrichmentThresholds::from(&config.enrichment);
            let load_terms = |path: &Option<PathBuf>, what: &str| -> Result<Option<Vec<EnrichedTerm>>> {
                let Some(path) = path else { return Ok(None) };
                let terms: Vec<EnrichedTerm> = read_json(path, what)?;
                Ok(Some(if *no_filter { terms } else { thresholds.apply(&terms) }))
            };

            let input = EnrichmentInput {
                gene_set_description: description.clone(),
                kegg: load_terms(kegg, "KEGG terms")?,
                go: load_terms(go, "GO terms")?,
            };

            let mut orchestrator = EnrichmentOrchestrator::new(dispatcher, parser);
            if let Some(dir) = &config.enrichment.checkpoint_dir {
                orchestrator =
                    orchestrator.with_checkpoint(EnrichmentOrchestrator::checkpoint_file(dir, description));
            }

            let report = orchestrator.run(input, backend, &generation).await?;

            if let Some(path) = output {
                write_network_tsv(path, &report.triples)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }

            let graph = report.graph();
            Ok(serde_json::json!({
                "gene_set": description,
                "backend": backend.as_str(),
                "kegg_summary": report.summary(cellscribe_core::EnrichmentSource::Kegg),
                "go_summary": report.summary(cellscribe_core::EnrichmentSource::Go),
                "overall_summary": report.overall_summary,
                "triples": report.triples.len(),
                "skipped_lines": report.skipped_lines(),
                "genes": graph.genes().count(),
                "resumed": report.resumed,
            }))
        }
        Commands::CheckBackend => {
            let available = dispatcher.check_backend(backend).await?;
            Ok(serde_json::json!({
                "backend": backend.as_str(),
                "model": generation.model_id,
                "available": available,
            }))
        }
        Commands::InitConfig { path, force } => init_config(path, *force),
    }
}

async fn run_pipeline(
    runner: &PipelineRunner,
    pipeline: &dyn AnalysisPipeline,
    dataset: &Path,
    backend: BackendSelector,
    generation: &GenerationConfig,
) -> Result<serde_json::Value> {
    let data = load_dataset(dataset)?;
    let result = runner
        .run(pipeline, &data, backend, generation)
        .await
        .with_context(|| format!("{} pipeline failed for '{}'", pipeline.name(), data.name()))?;

    if let ParsedResult::IntegerRecommendation(rec) = &result {
        if let Some(warning) = &rec.warning {
            eprintln!("{} {}", "Warning:".yellow().bold(), warning);
        }
    }

    Ok(serde_json::to_value(PipelineResult {
        pipeline: pipeline.name().to_string(),
        dataset: data.name().to_string(),
        backend: backend.as_str().to_string(),
        result,
    })?)
}

fn load_dataset(path: &Path) -> Result<DatasetSummary> {
    let data = DatasetSummary::from_json_file(path)
        .with_context(|| format!("Failed to load dataset summary {}", path.display()))?;
    info!(
        "Loaded dataset '{}' ({} cells, {} genes)",
        data.name(),
        data.cell_count(),
        data.gene_count()
    );
    Ok(data)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} from {}", what, path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid {} in {}", what, path.display()))
}

fn init_config(path: &Path, force: bool) -> Result<serde_json::Value> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite", path.display());
    }
    ConfigManager::create_default_config(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(serde_json::json!({
        "config_path": path.display().to_string(),
        "status": "created",
    }))
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => {
                        println!("{}: {}", key_colored, s.green());
                    }
                    serde_json::Value::Number(n) => {
                        println!("{}: {}", key_colored, n.to_string().yellow());
                    }
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}: {}", key_colored, val_colored);
                    }
                    serde_json::Value::Null => {
                        println!("{}: {}", key_colored, "-".dimmed());
                    }
                    _ => {
                        println!("{}:", key_colored);
                        print_pretty(val)?;
                    }
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("\n{}{}:", "Item ".cyan(), (i + 1).to_string().yellow());
                print_pretty(item)?;
            }
        }
        _ => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_overrides_win_over_config() {
        let cli = Cli::try_parse_from([
            "cellscribe",
            "--backend",
            "hosted",
            "--seed",
            "7",
            "--temperature",
            "0.5",
            "k-param",
            "--dataset",
            "pbmc.json",
        ])
        .unwrap();

        let mut config = CellScribeConfig::default();
        apply_cli_overrides(&mut config, &cli);

        assert_eq!(config.llm.selector().unwrap(), BackendSelector::Hosted);
        assert_eq!(config.llm.seed, 7);
        assert_eq!(config.llm.temperature, 0.5);
        assert_eq!(config.llm.max_output_tokens, CellScribeConfig::default().llm.max_output_tokens);
    }

    #[test]
    fn test_unknown_backend_fails_validation() {
        let cli = Cli::try_parse_from(["cellscribe", "--backend", "openai", "check-backend"]).unwrap();
        let mut config = CellScribeConfig::default();
        apply_cli_overrides(&mut config, &cli);

        assert!(ConfigManager::validate_config(&config).is_err());
    }

    #[test]
    fn test_cli_overrides_apply_before_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cellscribe.toml");
        std::fs::write(&path, "[llm]\ntemperature = 1.5\n").unwrap();
        assert!(ConfigManager::load_from(&path).is_err());

        let cli = Cli::try_parse_from([
            "cellscribe",
            "--config",
            path.to_str().unwrap(),
            "--temperature",
            "0.4",
            "--backend",
            "hosted",
            "--model",
            "gemini-1.5-pro",
            "check-backend",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.llm.temperature, 0.4);
        assert_eq!(
            config.llm.generation_config(BackendSelector::Hosted).model_id,
            "gemini-1.5-pro"
        );
    }

    #[test]
    fn test_init_config_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cellscribe.toml");

        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        assert!(init_config(&path, true).is_ok());

        let loaded = ConfigManager::load_from(&path).unwrap();
        assert_eq!(loaded.config().llm.seed, 42);
    }

    #[test]
    fn test_annotate_arguments() {
        let cli = Cli::try_parse_from([
            "cellscribe",
            "annotate",
            "--dataset",
            "pbmc.json",
            "--markers",
            "markers.json",
            "--tissue",
            "blood",
            "--report-unmatched",
        ])
        .unwrap();

        match cli.command {
            Commands::Annotate {
                grouping_key,
                report_unmatched,
                species,
                ..
            } => {
                assert_eq!(grouping_key, "seurat_clusters");
                assert_eq!(species, "human");
                assert!(report_unmatched);
            }
            _ => panic!("expected annotate"),
        }
    }
}
