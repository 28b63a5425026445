//! Tessera CLI — drive the association pipeline from the command line.
//!
//! Usage:
//!   tessera config show [--db path]
//!   tessera config set [--lookback-days N] [--min-score X] ... [--db path]
//!   tessera analyze --file article.json [--text body.txt] [--db path]
//!   tessera rebuild-associations [--limit N] [--db path]
//!   tessera rebuild-campaigns [--db path]
//!   tessera flag-entity <kind> <value> [--clear] [--db path]
//!   tessera runs [--limit N] [--db path]
//!   tessera stats [--db path]

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tessera::{
    ArticleId, ArticleRecord, EntityKind, IntelStore, OpenStore, Orchestrator, RawEntity,
    SimilarityConfig, SqliteStore, StaticExtractor,
};

#[derive(Parser)]
#[command(
    name = "tessera",
    version,
    about = "Historical association engine for threat-intelligence articles"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change the similarity configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run one article through the full pipeline
    Analyze {
        /// Article JSON file (see `ArticleInput` format)
        #[arg(long)]
        file: PathBuf,
        /// Optional file with the full original article text
        #[arg(long)]
        text: Option<PathBuf>,
        /// Rebuild campaigns after the analysis pass
        #[arg(long)]
        refresh_campaigns: bool,
    },
    /// Rescore associations for recent articles under the active config
    RebuildAssociations {
        /// How many recent articles to rescore
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },
    /// Rebuild the campaign set from current relationships
    RebuildCampaigns,
    /// Flag (or unflag) an entity as a false positive
    FlagEntity {
        /// Entity kind: indicator, technique, or threat_actor
        kind: String,
        /// Normalized entity value
        value: String,
        /// Clear the flag instead of setting it
        #[arg(long)]
        clear: bool,
    },
    /// Show recent extraction runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show store counts
    Stats,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the active configuration
    Show,
    /// Insert and activate a new configuration version
    Set {
        #[arg(long, default_value_t = 90)]
        lookback_days: u32,
        #[arg(long, default_value_t = 0.4)]
        w_indicator: f64,
        #[arg(long, default_value_t = 0.3)]
        w_technique: f64,
        #[arg(long, default_value_t = 0.2)]
        w_actor: f64,
        #[arg(long, default_value_t = 0.1)]
        w_semantic: f64,
        #[arg(long, default_value_t = 0.3)]
        min_score: f64,
        #[arg(long)]
        require_exact_match: bool,
        #[arg(long, default_value_t = 0.5)]
        campaign_min_score: f64,
    },
}

/// Article input for `analyze`: the pipeline's article fields plus the
/// pre-extracted entity candidates handed over by the surrounding product.
#[derive(Deserialize)]
struct ArticleInput {
    #[serde(default)]
    id: Option<uuid::Uuid>,
    title: String,
    published_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    executive_summary: Option<String>,
    #[serde(default)]
    technical_summary: Option<String>,
    #[serde(default)]
    entities: Vec<RawEntity>,
}

/// Get the default database path (~/.local/share/tessera/tessera.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let tessera_dir = data_dir.join("tessera");
    std::fs::create_dir_all(&tessera_dir).ok();
    tessera_dir.join("tessera.db")
}

fn open_store(db: Option<PathBuf>) -> Result<Arc<SqliteStore>, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    let store =
        SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(store))
}

fn cmd_config_show(store: &SqliteStore) -> i32 {
    match store.active_config() {
        Ok(Some(config)) => {
            println!("{}", serde_json::to_string_pretty(&config).unwrap_or_default());
            0
        }
        Ok(None) => {
            eprintln!("No active configuration. Run `tessera config set` to create one.");
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_config_set(store: &SqliteStore, config: SimilarityConfig) -> i32 {
    match store.insert_config(&config) {
        Ok(saved) => {
            println!(
                "Activated configuration version {}",
                saved.version.unwrap_or_default()
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_analyze(
    store: Arc<SqliteStore>,
    file: PathBuf,
    text: Option<PathBuf>,
    refresh_campaigns: bool,
) -> i32 {
    let input: ArticleInput = match std::fs::read_to_string(&file)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
    {
        Ok(input) => input,
        Err(e) => {
            eprintln!("Error reading {}: {}", file.display(), e);
            return 1;
        }
    };

    let original_text = match text {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(body) => Some(body),
            Err(e) => {
                eprintln!("Error reading {}: {}", path.display(), e);
                return 1;
            }
        },
        None => None,
    };

    let article_id = input.id.map(ArticleId::from_uuid).unwrap_or_default();
    let mut article = ArticleRecord::new(article_id, input.title, input.published_at);
    article.executive_summary = input.executive_summary;
    article.technical_summary = input.technical_summary;

    let extractor = Arc::new(StaticExtractor::new(input.entities));
    let orchestrator = build_orchestrator(store, extractor).with_campaign_refresh(refresh_campaigns);

    match orchestrator.analyze(&article, original_text.as_deref()).await {
        Ok(outcome) => {
            println!(
                "Analyzed {}: {} entities ({} new), {} relationships",
                article.id,
                outcome.entity_count,
                outcome.created_entities,
                outcome.relationships.len()
            );
            for rel in &outcome.relationships {
                if let Some(other) = rel.other(article.id) {
                    println!("  related {} score {:.3}", other, rel.score);
                }
            }
            0
        }
        Err(e) => {
            eprintln!("Error ({}): {}", e.code(), e);
            1
        }
    }
}

fn build_orchestrator(
    store: Arc<SqliteStore>,
    extractor: Arc<StaticExtractor>,
) -> Orchestrator {
    let orchestrator = Orchestrator::new(store as Arc<dyn IntelStore>, extractor)
        .with_event_sink(Arc::new(tessera::pipeline::LogSink));

    #[cfg(feature = "embeddings")]
    {
        match tessera::adapter::FastEmbedEmbedder::default_model() {
            Ok(embedder) => return orchestrator.with_embedder(Arc::new(embedder)),
            Err(e) => {
                eprintln!("Warning: embeddings unavailable ({}); scoring exact-match only", e);
            }
        }
    }

    orchestrator
}

async fn cmd_rebuild_associations(store: Arc<SqliteStore>, limit: usize) -> i32 {
    let orchestrator = build_orchestrator(store, Arc::new(StaticExtractor::default()));
    match orchestrator.rebuild_associations(limit).await {
        Ok(rebuilt) => {
            println!("Rescored associations for {} articles", rebuilt);
            0
        }
        Err(e) => {
            eprintln!("Error ({}): {}", e.code(), e);
            1
        }
    }
}

async fn cmd_rebuild_campaigns(store: Arc<SqliteStore>) -> i32 {
    let orchestrator = build_orchestrator(store, Arc::new(StaticExtractor::default()));
    match orchestrator.rebuild_campaigns().await {
        Ok(count) => {
            println!("Rebuilt {} campaigns", count);
            0
        }
        Err(e) => {
            eprintln!("Error ({}): {}", e.code(), e);
            1
        }
    }
}

fn cmd_flag_entity(store: &SqliteStore, kind: &str, value: &str, clear: bool) -> i32 {
    let kind = match EntityKind::from_str(kind) {
        Some(kind) => kind,
        None => {
            eprintln!("Unknown kind '{}'; expected indicator, technique, or threat_actor", kind);
            return 1;
        }
    };
    let entity = match store.lookup_entity(kind, value) {
        Ok(Some(entity)) => entity,
        Ok(None) => {
            eprintln!("No {} entity with value '{}'", kind, value);
            return 1;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match store.set_false_positive(entity.id, !clear) {
        Ok(()) => {
            println!(
                "{} {} '{}'",
                if clear { "Unflagged" } else { "Flagged" },
                kind,
                entity.value
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_runs(store: &SqliteStore, limit: usize) -> i32 {
    match store.recent_runs(limit) {
        Ok(runs) => {
            for run in runs {
                let error = run
                    .error_code
                    .map(|code| format!(" [{}]", code))
                    .unwrap_or_default();
                println!(
                    "{} article={} status={} entities={}{}",
                    run.started_at.to_rfc3339(),
                    run.article_id,
                    run.status,
                    run.entity_count,
                    error
                );
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_stats(store: &SqliteStore) -> i32 {
    match store.stats() {
        Ok(stats) => {
            println!("articles:      {}", stats.articles);
            println!("entities:      {}", stats.entities);
            println!("links:         {}", stats.links);
            println!("relationships: {}", stats.relationships);
            println!("campaigns:     {}", stats.campaigns);
            println!("runs:          {}", stats.runs);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let store = match open_store(cli.db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&store),
            ConfigAction::Set {
                lookback_days,
                w_indicator,
                w_technique,
                w_actor,
                w_semantic,
                min_score,
                require_exact_match,
                campaign_min_score,
            } => cmd_config_set(
                &store,
                SimilarityConfig {
                    version: None,
                    lookback_days,
                    w_indicator,
                    w_technique,
                    w_actor,
                    w_semantic,
                    min_score,
                    require_exact_match,
                    campaign_min_score,
                    created_at: chrono::Utc::now(),
                },
            ),
        },
        Commands::Analyze {
            file,
            text,
            refresh_campaigns,
        } => cmd_analyze(store, file, text, refresh_campaigns).await,
        Commands::RebuildAssociations { limit } => cmd_rebuild_associations(store, limit).await,
        Commands::RebuildCampaigns => cmd_rebuild_campaigns(store).await,
        Commands::FlagEntity { kind, value, clear } => {
            cmd_flag_entity(&store, &kind, &value, clear)
        }
        Commands::Runs { limit } => cmd_runs(&store, limit),
        Commands::Stats => cmd_stats(&store),
    };
    std::process::exit(code);
}
