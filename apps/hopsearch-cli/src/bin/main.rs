use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hopsearch_core::chunking::{Chunker, SourceDocument};
use hopsearch_core::config::{resolve_with_base, Config, EngineKind, LoggingSettings, Settings};
use hopsearch_core::data_processor::DataProcessor;
use hopsearch_core::schema::{IndexSchema, Similarity};
use hopsearch_core::traits::{Embedder, IndexEngine};
use hopsearch_core::types::QueryMode;
use hopsearch_embed::{get_default_embedder, resolve_model_dir, use_fake_embeddings, HfTokenCounter};
use hopsearch_es::EsEngine;
use hopsearch_hybrid::{
    load_extracted, seed_triples, triple_stream, BeamConfig, ChunkPreprocessor, HybridRetriever, IndexBuilder,
    LocalEngine, Preprocess, RetrieverConfig, TripleBeamSearch, TriplePreprocessor,
};

const USAGE: &str = "Usage: hopsearch <command> [args...]

Commands:
  index <path> [--index NAME]                     index .txt files under a directory or a .jsonl file
  index-triples <extracted.jsonl> [--chunk-index NAME] [--index NAME]
  search <query> [--mode dense|lexical|hybrid] [--limit N] [--index NAME] [--json]
  beam <query> [--beams N] [--hops N] [--index NAME]
  datasets [--name NAME] [--index NAME]
  document <id> [--index NAME]
  count [--index NAME]";

/// Positional arguments plus `--flag value` pairs; `--json` takes no value.
struct Args {
    positional: Vec<String>,
    flags: HashMap<String, String>,
    json: bool,
}

impl Args {
    fn parse(raw: &[String]) -> Result<Self> {
        let mut args = Args {
            positional: Vec::new(),
            flags: HashMap::new(),
            json: false,
        };
        let mut i = 0;
        while i < raw.len() {
            match raw[i].as_str() {
                "--json" => args.json = true,
                flag if flag.starts_with("--") => {
                    let value = raw.get(i + 1).ok_or_else(|| anyhow!("{flag} requires a value"))?;
                    args.flags.insert(flag.trim_start_matches("--").to_string(), value.clone());
                    i += 1;
                }
                _ => args.positional.push(raw[i].clone()),
            }
            i += 1;
        }
        Ok(args)
    }

    fn first(&self, what: &str) -> Result<&str> {
        self.positional
            .first()
            .map(String::as_str)
            .ok_or_else(|| anyhow!("missing {what}\n\n{USAGE}"))
    }

    fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    fn number(&self, name: &str) -> Result<Option<usize>> {
        self.flag(name)
            .map(|v| v.parse::<usize>().with_context(|| format!("--{name} requires a number")))
            .transpose()
    }
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn engine_from_settings(settings: &Settings) -> Result<Arc<dyn IndexEngine>> {
    Ok(match settings.engine.kind {
        EngineKind::Local => {
            let root = resolve_with_base(&env::current_dir()?, &settings.engine.local_root);
            info!(root = %root.display(), "using local engine");
            Arc::new(LocalEngine::new(root))
        }
        EngineKind::Elasticsearch => {
            info!(url = %settings.engine.url, "using elasticsearch engine");
            Arc::new(EsEngine::from_settings(&settings.engine)?)
        }
    })
}

/// Chunk sizes are counted in model tokens when a model is in use.
fn chunk_preprocessor(settings: &Settings) -> Result<Box<dyn Preprocess<SourceDocument>>> {
    let chunking = &settings.chunking;
    if !use_fake_embeddings(&settings.embedding) {
        if let Ok(dir) = resolve_model_dir(settings.embedding.model_dir.as_deref()) {
            let counter = HfTokenCounter::from_model_dir(&dir, settings.embedding.max_len)?;
            let chunker = Chunker::new(counter, chunking.chunk_size, chunking.overlap)?;
            return Ok(Box::new(ChunkPreprocessor::new(chunker)));
        }
    }
    Ok(Box::new(ChunkPreprocessor::new(Chunker::whitespace(chunking.chunk_size, chunking.overlap)?)))
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} chunks {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb
}

fn builder(engine: Arc<dyn IndexEngine>, embedder: Arc<dyn Embedder>, settings: &Settings) -> IndexBuilder {
    IndexBuilder::new(engine, embedder)
        .with_batch_size(settings.chunking.batch_size)
        .with_embed_batch_size(settings.embedding.batch_size)
        .with_progress(progress_bar())
}

fn retriever(engine: Arc<dyn IndexEngine>, settings: &Settings, index: String, mode: Option<QueryMode>) -> Result<HybridRetriever> {
    let mut config = RetrieverConfig::from_settings(&settings.retrieval)?;
    config.index = index;
    if let Some(mode) = mode {
        config.default_mode = mode;
    }
    let retriever = HybridRetriever::new(engine, config);
    match get_default_embedder(&settings.embedding) {
        Ok(embedder) => Ok(retriever.with_embedder(embedder)),
        Err(e) => {
            warn!("no embedder available, dense retrieval disabled: {e:#}");
            Ok(retriever)
        }
    }
}

async fn index(engine: Arc<dyn IndexEngine>, settings: &Settings, args: &Args) -> Result<()> {
    let path = PathBuf::from(args.first("input path")?);
    let name = args.flag("index").unwrap_or(settings.retrieval.index.as_str()).to_string();
    let documents = DataProcessor::new().load(&path)?;
    println!("Loaded {} documents from {}", documents.len(), path.display());

    let embedder = get_default_embedder(&settings.embedding)?;
    let schema = IndexSchema::for_chunks(
        embedder.dimension()?,
        settings.chunking.similarity.parse::<Similarity>()?,
        settings.chunking.analyzer.clone(),
    );
    let preprocess = chunk_preprocessor(settings)?;
    let report = builder(engine, embedder, settings)
        .build_index(&name, &schema, documents, preprocess.as_ref())
        .await?;
    println!(
        "✅ Indexed {} documents as {} chunks into '{}' ({} batches)",
        report.documents, report.chunks, name, report.batches
    );
    Ok(())
}

async fn index_triples(engine: Arc<dyn IndexEngine>, settings: &Settings, args: &Args) -> Result<()> {
    let path = PathBuf::from(args.first("extracted triples file")?);
    let chunk_index = args.flag("chunk-index").unwrap_or(settings.retrieval.index.as_str()).to_string();
    let name = args.flag("index").unwrap_or(settings.triples.index.as_str()).to_string();

    let extracted = load_extracted(&path)?;
    let embedder = get_default_embedder(&settings.embedding)?;
    let schema = IndexSchema::for_triples(embedder.dimension()?, settings.chunking.similarity.parse()?);
    let triples = triple_stream(engine.as_ref(), &chunk_index, &extracted);
    let report = builder(engine.clone(), embedder, settings)
        .build_index_from_stream(&name, &schema, triples, &TriplePreprocessor)
        .await?;
    if report.chunks == 0 {
        warn!(chunk_index = %chunk_index, "no triples matched the chunks");
    }
    println!("✅ Indexed {} triples into '{}'", report.chunks, name);
    Ok(())
}

async fn search(engine: Arc<dyn IndexEngine>, settings: &Settings, args: &Args) -> Result<()> {
    let query = args.first("query")?;
    let mode = args.flag("mode").map(str::parse::<QueryMode>).transpose()?;
    let limit = args.number("limit")?.unwrap_or(settings.retrieval.top_k);
    let name = args.flag("index").unwrap_or(settings.retrieval.index.as_str()).to_string();
    let retriever = retriever(engine, settings, name, mode)?;

    if args.json {
        let result = retriever.search_relevant_documents(query, &[], limit).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let mode = retriever.config().default_mode;
    let hits = retriever.retrieve(query, limit, mode).await?;
    let sources: Vec<String> = hits.sources().iter().map(ToString::to_string).collect();
    println!("🔍 {} results for \"{}\" ({})", hits.len(), query, sources.join(" + "));
    for (rank, entry) in hits.iter().enumerate() {
        println!("{:>2}. [{:.4}] {} | {}", rank + 1, entry.score, entry.item.id, entry.item.metadata.title);
        let preview: String = entry.item.text.chars().take(160).collect();
        println!("    {}", preview.replace('\n', " "));
    }
    Ok(())
}

async fn beam(engine: Arc<dyn IndexEngine>, settings: &Settings, args: &Args) -> Result<()> {
    let query = args.first("query")?;
    let name = args.flag("index").unwrap_or(settings.triples.index.as_str()).to_string();
    let mut config = BeamConfig::from_settings(&settings.triples);
    if let Some(n) = args.number("beams")? {
        config.num_beams = n;
    }
    if let Some(n) = args.number("hops")? {
        config.max_length = n;
    }

    let retriever = retriever(engine, settings, name, None)?;
    let seeds = seed_triples(&retriever, query, settings.triples.seed_k).await?;
    let search = TripleBeamSearch::new(Arc::new(retriever), config)?;
    let beams = search.search(query, seeds).await?;
    println!("🔗 {} paths for \"{}\"", beams.len(), query);
    for (rank, beam) in beams.iter().enumerate() {
        println!("{:>2}. [{:.4}]", rank + 1, beam.score());
        for triple in beam.triples() {
            println!("    {}  (from {})", triple.statement(), triple.chunk_id());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let settings = config.settings()?;
    init_tracing(&settings.logging);

    let mut raw: Vec<String> = env::args().skip(1).collect();
    if raw.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = raw.remove(0);
    if matches!(cmd.as_str(), "help" | "--help" | "-h") {
        println!("{USAGE}");
        return Ok(());
    }
    let args = Args::parse(&raw)?;
    let engine = engine_from_settings(&settings)?;

    match cmd.as_str() {
        "index" => index(engine, &settings, &args).await?,
        "index-triples" => index_triples(engine, &settings, &args).await?,
        "search" => search(engine, &settings, &args).await?,
        "beam" => beam(engine, &settings, &args).await?,
        "datasets" => {
            let name = args.flag("index").unwrap_or(settings.retrieval.index.as_str()).to_string();
            let retriever = HybridRetriever::new(engine, RetrieverConfig::new(name));
            let datasets = retriever.list_datasets(args.flag("name"), None);
            println!("{}", serde_json::to_string_pretty(&datasets)?);
        }
        "document" => {
            let id = args.first("document id")?;
            let name = args.flag("index").unwrap_or(settings.retrieval.index.as_str()).to_string();
            let retriever = HybridRetriever::new(engine, RetrieverConfig::new(name));
            let documents = retriever.list_documents(id).await?;
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }
        "count" => {
            let name = args.flag("index").unwrap_or(settings.retrieval.index.as_str());
            println!("{}: {} documents", name, engine.count(name).await?);
        }
        _ => {
            eprintln!("Unknown command: {}\n\n{USAGE}", cmd);
            std::process::exit(1);
        }
    }
    Ok(())
}
