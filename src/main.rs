use quarry::builder::{BuildMode, DocumentInput, KnowledgeBaseBuilder};
use quarry::cli::{Cli, Commands, ConfigAction};
use quarry::config::Config;
use quarry::corpus::{ChunkStore, CorpusLayout};
use quarry::embedding::FastEmbedProvider;
use quarry::enrich::ExtractiveSummarizer;
use quarry::error::{QuarryError, Result};
use quarry::retrieval::HybridRetriever;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse_args();

    match cli.command {
        Commands::Build { input } => cmd_build(cli.config, &input, BuildMode::Rebuild),
        Commands::Append { input } => cmd_build(cli.config, &input, BuildMode::Incremental),
        Commands::Retrieve {
            query,
            k,
            alpha,
            version,
            json,
        } => cmd_retrieve(cli.config, &query, k, alpha, version, json),
        Commands::Status => cmd_status(cli.config),
        Commands::Config { action } => cmd_config(cli.config, action),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quarry=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'quarry config init' to create one."
        );
        return Ok(Config::default());
    }

    Config::load(&path)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| QuarryError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

/// Collect extracted document text files (.txt / .md) under a directory.
/// Text extraction itself (PDF etc.) happens upstream.
fn collect_documents(input: &Path) -> Result<Vec<DocumentInput>> {
    fn visit(dir: &Path, root: &Path, out: &mut Vec<DocumentInput>) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to read input directory: {}", dir.display()),
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| QuarryError::Io {
                source: e,
                context: "Failed to read directory entry".to_string(),
            })?;
            let path = entry.path();

            if path.is_dir() {
                visit(&path, root, out)?;
                continue;
            }

            let is_text = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("txt") | Some("md")
            );
            if !is_text {
                continue;
            }

            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    let relative = path.strip_prefix(root).unwrap_or(&path);
                    let document_id = relative
                        .with_extension("")
                        .to_string_lossy()
                        .replace(std::path::MAIN_SEPARATOR, "_");
                    out.push(DocumentInput {
                        document_id,
                        source_path: path.display().to_string(),
                        text,
                    });
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable file {}: {}", path.display(), e);
                }
            }
        }

        Ok(())
    }

    let mut documents = Vec::new();
    visit(input, input, &mut documents)?;
    documents.sort_by(|a, b| a.document_id.cmp(&b.document_id));
    Ok(documents)
}

fn cmd_build(config_path: Option<PathBuf>, input: &Path, mode: BuildMode) -> Result<()> {
    let config = load_config(config_path)?;

    let documents = collect_documents(input)?;
    if documents.is_empty() {
        println!("No .txt or .md documents found under {}", input.display());
        return Ok(());
    }

    let provider = Arc::new(FastEmbedProvider::new(&config.embedding.model)?);
    let summarizer = Arc::new(ExtractiveSummarizer::default());
    let builder = KnowledgeBaseBuilder::new(config, summarizer, provider)?;

    let report = runtime()?.block_on(builder.build(documents, mode))?;

    println!("✓ Corpus version {} built in {}ms", report.version, report.duration_ms);
    println!("  Documents: {}", report.documents);
    println!("  Chunks:    {}", report.chunks);
    println!("  Embedded:  {}", report.embedded);

    if !report.skipped.is_empty() {
        println!("  Skipped documents:");
        for skipped in &report.skipped {
            println!("    {} ({})", skipped.document_id, skipped.reason);
        }
    }
    if !report.enrich_failures.is_empty() {
        println!(
            "  Enrichment failures: {} (chunks proceed without summaries)",
            report.enrich_failures.len()
        );
    }

    Ok(())
}

fn cmd_retrieve(
    config_path: Option<PathBuf>,
    query: &str,
    k: Option<usize>,
    alpha: Option<f32>,
    version: Option<String>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let layout = CorpusLayout::new(config.data_dir()?);

    let version = match version {
        Some(v) => v,
        None => layout.current_version()?.ok_or(QuarryError::NoCurrentCorpus)?,
    };

    let k = k.unwrap_or(config.retrieval.default_k);
    let alpha = alpha.unwrap_or(config.retrieval.default_alpha);

    let provider = Arc::new(FastEmbedProvider::new(&config.embedding.model)?);
    let retriever = HybridRetriever::open(
        &layout,
        &version,
        provider,
        config.retrieval.clone(),
        &config.indexing,
    )?;

    let results = runtime()?.block_on(retriever.retrieve(query, k, alpha))?;

    if json {
        let out = serde_json::to_string_pretty(&results).map_err(|e| QuarryError::Json {
            source: e,
            context: "Failed to serialize results".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results for '{}' in version {}", query, version);
        return Ok(());
    }

    println!("Top {} results for '{}' (version {}):", results.len(), query, version);
    for (i, result) in results.iter().enumerate() {
        println!(
            "\n{}. {} [fused {:.3} | dense {} | sparse {}]",
            i + 1,
            result.chunk_id,
            result.fused_score,
            result
                .dense_score
                .map(|s| format!("{:.3}", s))
                .unwrap_or_else(|| "-".to_string()),
            result
                .sparse_score
                .map(|s| format!("{:.3}", s))
                .unwrap_or_else(|| "-".to_string()),
        );
        println!("   source: {}", result.source_path);
        let preview: String = result.text.chars().take(200).collect();
        println!("   {}", preview.replace('\n', " "));
    }

    Ok(())
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let layout = CorpusLayout::new(config.data_dir()?);

    println!("Quarry Status");
    println!("=============");

    match layout.current_version()? {
        Some(version) => {
            println!("\nCurrent corpus version: {}", version);

            let store = ChunkStore::open(&layout.store_path(&version))?;
            let stats = store.stats()?;
            println!("  State:      {}", stats.state.as_str());
            println!("  Documents:  {}", stats.document_count);
            println!("  Chunks:     {}", stats.chunk_count);
            println!("  Embeddings: {}", stats.embedding_count);
        }
        None => {
            println!("\nNo corpus built yet. Run 'quarry build --input <dir>' first.");
        }
    }

    let versions_dir = layout.versions_dir();
    if versions_dir.exists() {
        let mut versions: Vec<String> = std::fs::read_dir(&versions_dir)
            .map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to read versions dir: {}", versions_dir.display()),
            })?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        versions.sort();

        println!("\nVersions on disk: {}", versions.len());
        for version in versions.iter().rev().take(5) {
            println!("  {}", version);
        }
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| QuarryError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let config = Config::default();
            config.save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}
