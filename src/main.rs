use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use phenolens::config::{self, PipelineConfig};
use phenolens::models::SourceDocument;
use phenolens::pipeline::llm::{LlmClient, OllamaClient};
use phenolens::pipeline::normalize::{Embedder, OntologyNormalizer, OntologySnapshot, TrigramEmbedder};
use phenolens::pipeline::sink::{JsonlRecordStore, RecordStore};
use phenolens::pipeline::stats::PipelineStats;
use phenolens::pipeline::{CancelHandle, ExtractionPipeline};

#[derive(Parser)]
#[command(name = "phenolens", version, about = "Per-patient clinical data extraction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the extraction pipeline over a batch of documents
    Run {
        /// JSON array of {"source_document_id", "text"} objects
        #[arg(long)]
        documents: PathBuf,
        /// HPO ontology snapshot
        #[arg(long)]
        hpo: Option<PathBuf>,
        /// HGNC ontology snapshot
        #[arg(long)]
        hgnc: Option<PathBuf>,
        /// Pipeline configuration (JSON). Defaults apply when omitted.
        #[arg(long, env = "PHENOLENS_CONFIG")]
        config: Option<PathBuf>,
        /// Output file, one JSON record per line
        #[arg(long, default_value = "records.jsonl")]
        out: PathBuf,
        /// Pattern-only extraction, no LLM calls
        #[arg(long)]
        no_llm: bool,
        /// Directory with model.onnx and tokenizer.json for semantic matching.
        /// Character trigrams are used when omitted.
        #[arg(long, env = "PHENOLENS_EMBEDDING_MODEL")]
        embedding_model: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    phenolens::init_tracing();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    match Cli::parse().command {
        Command::Run {
            documents,
            hpo,
            hgnc,
            config,
            out,
            no_llm,
            embedding_model,
        } => run(documents, hpo, hgnc, config, out, no_llm, embedding_model).await,
    }
}

async fn run(
    documents: PathBuf,
    hpo: Option<PathBuf>,
    hgnc: Option<PathBuf>,
    config_path: Option<PathBuf>,
    out: PathBuf,
    no_llm: bool,
    embedding_model: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => PipelineConfig::from_json_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let load = |path: Option<PathBuf>| -> anyhow::Result<Option<OntologySnapshot>> {
        path.map(|p| {
            OntologySnapshot::from_json_file(&p)
                .with_context(|| format!("loading ontology {}", p.display()))
        })
        .transpose()
    };
    let normalizer = OntologyNormalizer::from_snapshots(
        load(hpo)?,
        load(hgnc)?,
        Some(load_embedder(embedding_model)?),
        &config.normalization,
    )?;

    let llm: Option<Arc<dyn LlmClient>> = if no_llm {
        None
    } else {
        let client = OllamaClient::new(&config.llm_base_url, config.llm_request_timeout_secs)?;
        Some(Arc::new(client))
    };

    let raw = tokio::fs::read_to_string(&documents)
        .await
        .with_context(|| format!("reading {}", documents.display()))?;
    let docs: Vec<SourceDocument> =
        serde_json::from_str(&raw).context("documents file must be a JSON array")?;

    let pipeline = Arc::new(ExtractionPipeline::new(config, llm, normalizer)?);

    let cancel = CancelHandle::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing with completed agents");
            on_ctrl_c.cancel();
        }
    });

    let mut stats = PipelineStats::default();
    let outcome = pipeline.process_batch(docs, &cancel, &mut stats).await;

    for failure in &outcome.failures {
        tracing::warn!(
            document_id = %failure.source_document_id,
            error = %failure.error,
            "Document failed"
        );
    }

    let store = JsonlRecordStore::new(&out);
    let mut written = 0;
    for document in &outcome.documents {
        written += store.store(&document.records).await?.len();
    }
    tracing::info!(path = %out.display(), records = written, "Records written");

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn load_embedder(model_dir: Option<PathBuf>) -> anyhow::Result<Arc<dyn Embedder>> {
    let Some(dir) = model_dir else {
        return Ok(Arc::new(TrigramEmbedder::new()));
    };

    #[cfg(feature = "onnx-embeddings")]
    {
        let embedder = phenolens::pipeline::normalize::OnnxEmbedder::load(&dir)
            .with_context(|| format!("loading embedding model {}", dir.display()))?;
        Ok(Arc::new(embedder))
    }

    #[cfg(not(feature = "onnx-embeddings"))]
    anyhow::bail!(
        "--embedding-model {} needs a build with the onnx-embeddings feature",
        dir.display()
    )
}
