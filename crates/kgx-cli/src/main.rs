//! CLI binary for kgx: runs the delta/staged/direct extraction pipeline
//! against a schema and a Markdown document, printing the projected tree
//! as JSON.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kgx_batch::ChunkMeta;
use kgx_core::config::{ExtractionConfig, ExtractionContract};
use kgx_core::Schema;
use kgx_orchestrate::DocumentSource;

#[derive(Parser)]
#[command(name = "kgx", about = "Document-extraction-to-knowledge-graph pipeline")]
struct Cli {
    /// Project root directory, used to locate `kgx.toml` (defaults to the
    /// current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a knowledge graph from a document against a schema
    Extract {
        /// Path to a JSON-encoded schema (see `kgx_core::Schema`)
        #[arg(long)]
        schema: PathBuf,

        /// Path to the source document, already converted to Markdown
        #[arg(long)]
        document: PathBuf,

        /// Extraction contract: delta, staged, or direct (overrides kgx.toml)
        #[arg(long)]
        contract: Option<String>,

        /// Write the projected tree here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show the effective configuration for the project root
    Config,
}

fn get_project_root(cli: &Cli) -> Result<PathBuf> {
    match &cli.project {
        Some(p) => Ok(p.clone()),
        None => std::env::current_dir().context("failed to get current directory"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let project_root = match get_project_root(&cli) {
        Ok(root) => root,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Commands::Extract { schema, document, contract, out } => {
            cmd_extract(&project_root, &schema, &document, contract.as_deref(), out.as_deref()).await
        }
        Commands::Config => cmd_config(&project_root),
    }
}

fn cmd_config(project_root: &Path) -> ExitCode {
    match ExtractionConfig::load(project_root) {
        Ok(config) => {
            match serde_json::to_string_pretty(&config) {
                Ok(json) => println!("{json}"),
                Err(err) => {
                    eprintln!("error: failed to render config: {err}");
                    return ExitCode::from(3);
                }
            }
            ExitCode::from(0)
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn cmd_extract(
    project_root: &Path,
    schema_path: &Path,
    document_path: &Path,
    contract_override: Option<&str>,
    out: Option<&Path>,
) -> ExitCode {
    let mut config = match ExtractionConfig::load(project_root) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(1);
        }
    };

    if let Some(contract) = contract_override {
        match parse_contract(contract) {
            Ok(parsed) => config.contract = parsed,
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::from(1);
            }
        }
    }

    let schema: Schema = match std::fs::read_to_string(schema_path)
        .context("failed to read schema file")
        .and_then(|s| serde_json::from_str(&s).context("failed to parse schema JSON"))
    {
        Ok(schema) => schema,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(1);
        }
    };

    let markdown = match std::fs::read_to_string(document_path).context("failed to read document file") {
        Ok(markdown) => markdown,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(1);
        }
    };

    let completer = match kgx_completer::from_env() {
        Ok(completer) => completer,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };

    let source = MarkdownFileSource::new(markdown);
    let result = kgx_orchestrate::extract(&source, &schema, completer.as_ref(), &config).await;

    for line in &result.errors {
        eprintln!("warning: {line}");
    }

    let write_result = match out {
        Some(path) => std::fs::write(path, serde_json::to_string_pretty(&result.tree).unwrap_or_default())
            .with_context(|| format!("failed to write output to {}", path.display())),
        None => {
            println!("{}", serde_json::to_string_pretty(&result.tree).unwrap_or_default());
            Ok(())
        }
    };

    if let Err(err) = write_result {
        eprintln!("error: {err:#}");
        return ExitCode::from(3);
    }

    if !result.stats.quality_gate.ok {
        eprintln!("warning: quality gate failed: {}", result.stats.quality_gate.reasons.join("; "));
        return ExitCode::from(2);
    }

    ExitCode::from(0)
}

fn parse_contract(name: &str) -> Result<ExtractionContract> {
    match name {
        "delta" => Ok(ExtractionContract::Delta),
        "staged" => Ok(ExtractionContract::Staged),
        "direct" => Ok(ExtractionContract::Direct),
        other => anyhow::bail!("unknown contract '{other}'; expected delta, staged, or direct"),
    }
}

/// A [`DocumentSource`] over a Markdown file already on disk, chunked on
/// blank-line paragraph boundaries with a chars/4+1 token estimate
/// (matching `kgx_batch::ChunkBatcher`'s own fallback convention).
/// Page numbers are always `1`: paginated source documents are converted
/// upstream of this CLI, which is out of scope here (spec.md §1).
struct MarkdownFileSource {
    markdown: String,
}

impl MarkdownFileSource {
    fn new(markdown: String) -> Self {
        Self { markdown }
    }
}

impl DocumentSource for MarkdownFileSource {
    fn to_full_markdown(&self) -> String {
        self.markdown.clone()
    }

    fn to_chunks(&self, chunk_max_tokens: usize) -> Vec<ChunkMeta> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for paragraph in self.markdown.split("\n\n") {
            let candidate_tokens = estimate_tokens(&current) + estimate_tokens(paragraph);
            if !current.is_empty() && candidate_tokens > chunk_max_tokens {
                chunks.push(finish_chunk(std::mem::take(&mut current)));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }
        if !current.is_empty() {
            chunks.push(finish_chunk(current));
        }

        chunks
    }
}

fn finish_chunk(text: String) -> ChunkMeta {
    let token_count = estimate_tokens(&text);
    ChunkMeta {
        text,
        page_numbers: vec![1],
        token_count,
    }
}

fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}
