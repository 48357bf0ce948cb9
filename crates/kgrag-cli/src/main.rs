//! kgrag CLI: bounded subgraph extraction and LLM cache maintenance
//!
//! Commands: init, import, graph, labels, cache (modes, show, drop),
//! completions

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use kgrag_core::graph::Properties;
use kgrag_core::{GraphNode, GraphView, KgragConfig, ModeCache};
use kgrag_index::{SqliteGraphStore, SqliteModeCache};
use kgrag_query::{ExportFormat, SubgraphExtractor};

#[derive(Parser)]
#[command(name = "kgrag")]
#[command(version)]
#[command(about = "Knowledge-graph retrieval: bounded subgraphs and an LLM response cache")]
struct Cli {
    /// Database file (overrides storage.path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache workspace (overrides storage.workspace)
    #[arg(long, global = true)]
    workspace: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Load nodes and edges from a JSON file
    Import {
        /// JSON file with `nodes` and `edges` arrays
        file: PathBuf,
    },
    /// Extract the subgraph around a label ("*" for highest-degree nodes)
    #[command(alias = "g")]
    Graph {
        label: String,
        /// Maximum traversal depth (default: graph.max_depth)
        #[arg(long)]
        depth: Option<usize>,
        /// Node budget (default: graph.max_nodes)
        #[arg(long)]
        max_nodes: Option<usize>,
        /// Output format: json, dot, mermaid
        #[arg(long, default_value = "json")]
        format: ExportFormat,
    },
    /// List all node labels
    Labels,
    /// Inspect or clear the LLM response cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List cached modes with entry counts
    Modes,
    /// Show the entries of one mode
    Show { mode: String },
    /// Delete every entry of the given modes
    Drop {
        #[arg(required = true)]
        modes: Vec<String>,
    },
}

/// Import file layout. Accepts the output of `kgrag graph --format json`.
#[derive(Deserialize)]
struct ImportFile {
    #[serde(default)]
    nodes: Vec<GraphNode>,
    #[serde(default)]
    edges: Vec<ImportEdge>,
}

#[derive(Deserialize)]
struct ImportEdge {
    source: String,
    target: String,
    #[serde(rename = "type", default = "default_edge_type")]
    edge_type: String,
    #[serde(default)]
    properties: Properties,
}

fn default_edge_type() -> String {
    "DIRECTED".to_string()
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<KgragConfig> {
    let mut config = match &cli.config {
        Some(path) => KgragConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let mut config = KgragConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Some(db) = &cli.db {
        config.storage.path = db.clone();
    }
    if let Some(workspace) = &cli.workspace {
        config.storage.workspace = workspace.clone();
    }
    config.validate()?;
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn open_graph(config: &KgragConfig) -> Result<SqliteGraphStore> {
    SqliteGraphStore::open(&config.storage.path)
        .with_context(|| format!("failed to open {}", config.storage.path.display()))
}

fn open_cache(config: &KgragConfig) -> Result<SqliteModeCache> {
    SqliteModeCache::open(&config.storage.path, &config.storage.workspace)
        .with_context(|| format!("failed to open {}", config.storage.path.display()))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(config: &KgragConfig) -> Result<()> {
    open_graph(config)?;
    open_cache(config)?;
    println!(
        "Initialized kgrag database at {}",
        config.storage.path.display()
    );
    Ok(())
}

fn cmd_import(config: &KgragConfig, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let import: ImportFile = serde_json::from_str(&raw)
        .with_context(|| format!("invalid graph file {}", file.display()))?;

    let store = open_graph(config)?;
    for mut node in import.nodes.iter().cloned() {
        if node.labels.is_empty() {
            node.labels.push(node.id.clone());
        }
        store.upsert_node(&node)?;
    }

    let mut skipped = 0usize;
    for edge in &import.edges {
        let id = store.upsert_edge(&edge.source, &edge.target, &edge.edge_type, &edge.properties)?;
        if id.is_none() {
            warn!(source = %edge.source, target = %edge.target, "skipping edge with missing endpoint");
            skipped += 1;
        }
    }
    info!(
        nodes = import.nodes.len(),
        edges = import.edges.len() - skipped,
        skipped,
        "import finished"
    );

    print_json(&json!({
        "nodes": import.nodes.len(),
        "edges": import.edges.len() - skipped,
        "skipped_edges": skipped,
    }))
}

async fn cmd_graph(
    config: &KgragConfig,
    label: &str,
    depth: Option<usize>,
    max_nodes: Option<usize>,
    format: ExportFormat,
) -> Result<()> {
    let store = open_graph(config)?;
    let graph = SubgraphExtractor::new(&store)
        .extract(
            label,
            depth.unwrap_or(config.graph.max_depth),
            max_nodes.unwrap_or(config.graph.max_nodes),
        )
        .await?;
    println!("{}", format.render(&graph));
    Ok(())
}

async fn cmd_labels(config: &KgragConfig) -> Result<()> {
    let store = open_graph(config)?;
    for label in store.get_all_labels().await? {
        println!("{label}");
    }
    Ok(())
}

async fn cmd_cache(config: &KgragConfig, command: &CacheCommand) -> Result<()> {
    let cache = open_cache(config)?;
    match command {
        CacheCommand::Modes => {
            let modes: Vec<_> = cache
                .modes()?
                .into_iter()
                .map(|m| json!({ "mode": m.mode, "entries": m.entries }))
                .collect();
            print_json(&json!(modes))
        }
        CacheCommand::Show { mode } => {
            let entries: Vec<_> = cache
                .get_bucket(mode)
                .await?
                .unwrap_or_default()
                .into_values()
                .map(|e| {
                    json!({
                        "id": e.args_hash,
                        "cache_type": e.cache_type,
                        "original_prompt": e.original_prompt,
                        "return": e.return_value,
                        "has_embedding": e.embedding.is_some(),
                        "updated_at": e.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            print_json(&json!(entries))
        }
        CacheCommand::Drop { modes } => {
            let dropped = cache.drop_modes(modes).await?;
            print_json(&json!({
                "workspace": cache.workspace(),
                "dropped": dropped,
                "modes": modes,
            }))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "kgrag", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli)?;
    match &cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Import { file } => cmd_import(&config, file),
        Commands::Graph {
            label,
            depth,
            max_nodes,
            format,
        } => cmd_graph(&config, label, *depth, *max_nodes, *format).await,
        Commands::Labels => cmd_labels(&config).await,
        Commands::Cache(command) => cmd_cache(&config, command).await,
        Commands::Completions { .. } => Ok(()),
    }
}
