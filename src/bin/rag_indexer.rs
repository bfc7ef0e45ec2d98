use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

use cv_rag::config::Settings;
use cv_rag::models::CandidateRecord;
use cv_rag::proxy::KeyRing;
use cv_rag::rag::chunker::build_chunks;
use cv_rag::rag::embeddings::{EmbeddingGenerator, EmbeddingProvider};
use cv_rag::rag::index_builder::{build_entries, BatchPolicy};
use cv_rag::rag::index_cache::{fingerprint, IndexCache};
use cv_rag::rag::vector_store::VectorIndex;

#[derive(Parser, Debug)]
#[command(name = "rag-indexer")]
#[command(about = "Build the candidate vector index cache ahead of the first question")]
struct Args {
    /// JSON file holding an array of candidate records
    #[arg(short, long)]
    dataset: PathBuf,

    /// Cache slot to write (defaults to index.cache_path)
    #[arg(long, env = "CV_RAG_INDEX_CACHE")]
    cache: Option<PathBuf>,

    /// Rebuild even when the cache already matches the dataset
    #[arg(long)]
    force: bool,

    /// Override the number of concurrent embedding calls per batch
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    cv_rag::init_tracing();

    let args = Args::parse();
    let mut settings = Settings::load()?;
    if let Some(batch_size) = args.batch_size {
        settings.index.batch_size = batch_size;
        settings.validate()?;
    }

    let raw = std::fs::read_to_string(&args.dataset)
        .with_context(|| format!("Failed to read dataset {}", args.dataset.display()))?;
    let records: Vec<CandidateRecord> =
        serde_json::from_str(&raw).context("Dataset must be a JSON array of candidate records")?;

    let cache_path = args.cache.clone().unwrap_or_else(|| settings.index.cache_path.clone());
    let cache = IndexCache::new(cache_path);
    let fp = fingerprint(&records);

    let keys = Arc::new(KeyRing::new(settings.provider.api_keys.clone())?);
    let embeddings = EmbeddingGenerator::new(&settings.provider, keys)?;

    println!("Dataset:      {} ({} records)", args.dataset.display(), records.len());
    println!("Fingerprint:  {}", fp);

    if !args.force {
        if let Some(cached) = cache.fetch(&fp, embeddings.model()).await {
            println!("\nCache is up to date ({} entries), nothing to do.", cached.index.len());
            return Ok(());
        }
    }

    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("embedding");

    let chunks = build_chunks(&records);
    let policy = BatchPolicy::from(&settings.index);
    let outcome = build_entries(&embeddings, chunks, policy, |progress| {
        pb.set_position(progress.completed as u64);
    })
    .await;

    pb.finish_with_message("done");

    let index = Arc::new(VectorIndex::new(fp, outcome.entries));
    cache.persist(index.clone(), embeddings.model(), Utc::now()).await?;

    println!("\nIndexing complete!");
    println!("  Records:        {}", records.len());
    println!("  Indexed:        {}", index.len());
    println!("  Failed:         {}", outcome.failed);
    println!("  Model:          {}", embeddings.model());
    println!("  Cache:          {}", cache.path().display());

    if outcome.failed > 0 {
        println!(
            "\n{} candidate(s) could not be embedded and will not be searchable.",
            outcome.failed
        );
    }

    Ok(())
}
