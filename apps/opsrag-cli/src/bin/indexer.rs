use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use opsrag_cli::{bootstrap, open_engine, vector_store_dir};
use opsrag_core::config::expand_path;
use opsrag_core::records::{load_directory, load_json_records, LoadReport};

#[derive(Parser, Debug)]
#[command(name = "opsrag-indexer", about = "Build and inspect the ops knowledge base")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, deduplicate, embed and store documents.
    Ingest {
        /// JSON array of records; defaults to `data.knowledge_file`.
        #[arg(long)]
        json: Option<PathBuf>,
        /// Directory of .md/.txt files.
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Delete the existing vector store first.
        #[arg(long)]
        fresh: bool,
    },
    /// Print index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = bootstrap()?;

    match cli.command {
        Command::Ingest { json, dir, fresh } => {
            let mut input = LoadReport::default();
            let json = if json.is_none() && dir.is_none() { Some(expand_path(&settings.data.knowledge_file)) } else { json };
            if let Some(path) = json {
                println!("Loading records from {}", path.display());
                merge(&mut input, load_json_records(&path)?);
            }
            if let Some(path) = dir {
                println!("Loading files from {}", path.display());
                merge(&mut input, load_directory(&path)?);
            }
            if input.documents.is_empty() {
                bail!("nothing to ingest ({} records skipped)", input.skipped.len());
            }

            let engine = open_engine(&settings, fresh).await?;
            println!("Vector store: {}  embedder: {}", vector_store_dir(&settings).display(), engine.embedder_id());

            let pb = ProgressBar::new(input.documents.len() as u64);
            pb.set_style(
                ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} docs {msg}")?
                    .progress_chars("##-"),
            );
            let report = engine
                .ingest_with_progress(&input.documents, |r| {
                    pb.set_position(r.documents as u64);
                    pb.set_message(format!("{} chunks kept", r.accepted));
                })
                .await?;
            pb.finish_and_clear();

            println!("\n✅ Ingest complete");
            println!("  documents:          {}", report.documents);
            println!("  records skipped:    {}", input.skipped.len());
            println!("  chunks seen:        {}", report.chunks_seen);
            println!("  chunks accepted:    {}", report.accepted);
            println!("  duplicate ids:      {}", report.duplicate_ids);
            println!("  exact duplicates:   {}", report.exact_duplicates);
            println!("  near duplicates:    {}", report.near_duplicates);
            println!("  embedding failures: {}", report.embedding_failures);
            println!("  store failures:     {}", report.store_failures);
        }
        Command::Stats => {
            let engine = open_engine(&settings, false).await?;
            let stats = engine.stats().await?;
            println!("📊 Knowledge base at {}", vector_store_dir(&settings).display());
            println!("  active embedder: {}", stats.active_embedder);
            println!("  corpus chunks:   {}", stats.corpus_chunks);
            println!("  lexical index:   {}", stats.lexical_chunks);
            println!("  stored rows:     {}", stats.stored_rows);
            for (embedder, rows) in &stats.rows_by_embedder {
                let note = if *embedder == stats.active_embedder { "" } else { "  (inactive; re-ingest with --fresh)" };
                println!("    {embedder}: {rows}{note}");
            }
        }
    }
    Ok(())
}

fn merge(into: &mut LoadReport, from: LoadReport) {
    into.documents.extend(from.documents);
    into.skipped.extend(from.skipped);
}
