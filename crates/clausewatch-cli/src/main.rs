use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use clausewatch_client::{HttpAnalyzer, PolicyExtractor, ReqwestTransport};
use clausewatch_core::cascade::DEFAULT_ARCHIVE_AVAILABILITY_URL;
use clausewatch_core::monitor::TracingMonitorReporter;
use clausewatch_core::strategies::FallbackSource;
use clausewatch_core::traits::ContentExtractor;
use clausewatch_core::{
    AppError, Analysis, Analyzer, CacheConfig, CascadeConfig, ChangeMonitor, DiffEngine,
    DocumentType, FetchCascade, MonitorConfig, MonitorTarget, NullAnalyzer, PolicyPipeline,
    PolicyVersion, RateLimitConfig, RateLimiter, VersionCache, content_hash,
};
use clausewatch_db::{ChangeRepository, Database, DatabaseConfig, VersionRepository};

type Cascade = FetchCascade<ReqwestTransport>;
type Cache = VersionCache<Cascade, PolicyExtractor, VersionRepository>;

#[derive(Parser)]
#[command(
    name = "clausewatch",
    version,
    about = "Track privacy policies and terms of service over time"
)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args)]
struct Settings {
    /// Analysis service endpoint; documents score 0 when unset
    #[arg(long, global = true, env = "CLAUSEWATCH_ANALYZER_URL")]
    analyzer_url: Option<String>,

    /// Bearer token for the analysis service
    #[arg(long, global = true, env = "CLAUSEWATCH_ANALYZER_KEY", hide_env_values = true)]
    analyzer_key: Option<String>,

    /// Days a stored version is served without revalidation
    #[arg(long, global = true, env = "CLAUSEWATCH_TTL_DAYS", default_value_t = 7)]
    ttl_days: u64,

    /// Per-request timeout for the target site
    #[arg(long, global = true, env = "CLAUSEWATCH_FETCH_TIMEOUT_SECS", default_value_t = 15)]
    fetch_timeout_secs: u64,

    /// Attempts per user-agent before rotating
    #[arg(long, global = true, env = "CLAUSEWATCH_FETCH_MAX_RETRIES", default_value_t = 3)]
    fetch_max_retries: u32,

    /// Per-request timeout for the cache mirror and archive
    #[arg(long, global = true, env = "CLAUSEWATCH_FETCH_ARCHIVE_TIMEOUT_SECS", default_value_t = 10)]
    archive_timeout_secs: u64,

    /// Minimum spacing between requests to the same domain
    #[arg(long, global = true, env = "CLAUSEWATCH_MIN_INTERVAL_MS", default_value_t = 1000)]
    min_interval_ms: u64,

    /// Cache mirror prefix used as the first fallback source
    #[arg(long, global = true, env = "CLAUSEWATCH_MIRROR_BASE")]
    mirror_base: Option<String>,

    /// Allow fetching private/reserved addresses
    #[arg(long, global = true, default_value_t = false)]
    allow_private_urls: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire and extract a policy page without storing it
    Fetch {
        #[arg(short, long)]
        url: String,

        /// Print metadata and text as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Return the current version of a document, fetching only when needed
    Check {
        #[arg(short, long)]
        domain: String,

        /// privacy, terms, cookies or other
        #[arg(short = 't', long = "type")]
        document_type: DocumentType,

        #[arg(short, long)]
        url: String,
    },

    /// Store policy text supplied by hand (file path or '-' for stdin)
    Ingest {
        #[arg(short, long)]
        domain: String,

        #[arg(short = 't', long = "type")]
        document_type: DocumentType,

        /// URL the text was taken from
        #[arg(short, long)]
        url: String,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show stored versions of a document
    History {
        #[arg(short, long)]
        domain: String,

        #[arg(short = 't', long = "type")]
        document_type: DocumentType,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Compare two stored versions
    Diff {
        version_a: Uuid,
        version_b: Uuid,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Re-acquire targets now and record any changes
    Recheck {
        /// domain:type, repeatable
        #[arg(long = "target", required = true)]
        targets: Vec<MonitorTarget>,

        /// Delay between targets
        #[arg(long, default_value_t = 1)]
        delay_secs: u64,
    },

    /// Recheck targets periodically until interrupted
    Monitor {
        /// domain:type, repeatable
        #[arg(long = "target", required = true)]
        targets: Vec<MonitorTarget>,

        #[arg(long, default_value_t = 24)]
        interval_hours: u64,

        #[arg(long, default_value_t = 1)]
        delay_secs: u64,
    },

    /// List undismissed changes
    Changes {
        #[arg(short, long)]
        domain: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Acknowledge a change
    Dismiss { change_id: Uuid },
}

/// The analysis collaborator chosen at startup.
#[derive(Clone)]
enum CliAnalyzer {
    Http(HttpAnalyzer),
    Null(NullAnalyzer),
}

impl Analyzer for CliAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Analysis, AppError> {
        match self {
            CliAnalyzer::Http(analyzer) => analyzer.analyze(text).await,
            CliAnalyzer::Null(analyzer) => analyzer.analyze(text).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("clausewatch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;

    match cli.command {
        Commands::Fetch { url, json } => cmd_fetch(&settings, &url, json).await,
        Commands::Check {
            domain,
            document_type,
            url,
        } => cmd_check(&settings, &domain, document_type, &url).await,
        Commands::Ingest {
            domain,
            document_type,
            url,
            file,
        } => cmd_ingest(&settings, &domain, document_type, &url, &file).await,
        Commands::History {
            domain,
            document_type,
            limit,
        } => cmd_history(&domain, document_type, limit).await,
        Commands::Diff {
            version_a,
            version_b,
            json,
        } => cmd_diff(version_a, version_b, json).await,
        Commands::Recheck {
            targets,
            delay_secs,
        } => cmd_recheck(&settings, &targets, delay_secs).await,
        Commands::Monitor {
            targets,
            interval_hours,
            delay_secs,
        } => cmd_monitor(&settings, &targets, interval_hours, delay_secs).await,
        Commands::Changes { domain, limit } => cmd_changes(domain.as_deref(), limit).await,
        Commands::Dismiss { change_id } => cmd_dismiss(change_id).await,
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn cascade_config(settings: &Settings) -> CascadeConfig {
    let config = CascadeConfig::default()
        .with_request_timeout(Duration::from_secs(settings.fetch_timeout_secs))
        .with_archive_timeout(Duration::from_secs(settings.archive_timeout_secs))
        .with_max_retries(settings.fetch_max_retries);
    match &settings.mirror_base {
        Some(base_url) => config.with_fallbacks(vec![
            FallbackSource::CacheMirror {
                base_url: base_url.clone(),
            },
            FallbackSource::ArchiveSnapshot {
                availability_url: DEFAULT_ARCHIVE_AVAILABILITY_URL.to_string(),
            },
        ]),
        None => config,
    }
}

fn build_cascade(settings: &Settings) -> Result<Cascade> {
    let mut transport = ReqwestTransport::new().context("Failed to create HTTP client")?;
    if settings.allow_private_urls {
        transport = transport.allow_private_urls();
    }

    let limiter = RateLimiter::new(
        RateLimitConfig::new(Duration::from_millis(settings.min_interval_ms))
            .with_jitter(Duration::from_millis(500)),
    );

    Ok(FetchCascade::new(transport, limiter, cascade_config(settings)))
}

fn build_analyzer(settings: &Settings) -> Result<CliAnalyzer> {
    match &settings.analyzer_url {
        Some(url) => {
            let mut analyzer = HttpAnalyzer::new(url)?;
            if let Some(key) = &settings.analyzer_key {
                analyzer = analyzer.with_api_key(key);
            }
            Ok(CliAnalyzer::Http(analyzer))
        }
        None => {
            tracing::warn!("CLAUSEWATCH_ANALYZER_URL not set, scores will be 0");
            Ok(CliAnalyzer::Null(NullAnalyzer))
        }
    }
}

fn build_cache(settings: &Settings, db: &Database) -> Result<Cache> {
    let config =
        CacheConfig::default().with_ttl(Duration::from_secs(settings.ttl_days * 24 * 60 * 60));
    Ok(VersionCache::new(
        build_cascade(settings)?,
        PolicyExtractor::new(),
        db.version_repo(),
        config,
    ))
}

fn build_monitor(
    settings: &Settings,
    db: &Database,
    delay: Duration,
    interval: Duration,
) -> Result<ChangeMonitor<Cascade, PolicyExtractor, VersionRepository, CliAnalyzer, ChangeRepository>>
{
    Ok(ChangeMonitor::new(
        build_cache(settings, db)?,
        build_analyzer(settings)?,
        db.change_repo(),
        MonitorConfig::default()
            .with_inter_item_delay(delay)
            .with_interval(interval),
    ))
}

/// Attach the user-facing advice for acquisition failures.
fn with_guidance<T>(result: Result<T, AppError>) -> Result<T> {
    result.map_err(|e| {
        let guidance = e.user_guidance();
        anyhow::Error::new(e).context(guidance)
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_fetch(settings: &Settings, url: &str, json: bool) -> Result<()> {
    let cascade = build_cascade(settings)?;
    let fetched = with_guidance(cascade.acquire(url).await)?;
    let document = with_guidance(PolicyExtractor::new().extract(
        &fetched.bytes,
        &fetched.content_type,
        url,
    ))?;
    let hash = content_hash(&document.normalized_text);

    tracing::info!(
        source = %fetched.source,
        final_url = %fetched.final_url,
        chars = document.length,
        content_hash = %&hash[..8],
        "Fetched document"
    );

    if json {
        let output = serde_json::json!({
            "url": url,
            "final_url": fetched.final_url,
            "source": fetched.source,
            "title": document.title,
            "content_hash": hash,
            "length": document.length,
            "text": document.normalized_text,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", document.normalized_text);
    }
    Ok(())
}

async fn cmd_check(
    settings: &Settings,
    domain: &str,
    document_type: DocumentType,
    url: &str,
) -> Result<()> {
    let db = connect_db().await?;
    let pipeline = PolicyPipeline::with_change_tracking(
        build_cache(settings, &db)?,
        build_analyzer(settings)?,
        db.change_repo(),
    );

    let result = with_guidance(pipeline.get_document(domain, document_type, url).await)?;
    let version = &result.version;

    let status = match (result.from_cache, result.changed) {
        (true, _) => "cached",
        (false, true) => "CHANGED",
        (false, false) => "unchanged",
    };
    println!(
        "[{status}] {domain} {document_type}: version {} score {} ({} words, analyzed {})",
        version.id,
        version.score,
        version.word_count,
        version.analyzed_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if let Some(change) = result.change {
        println!("  change {}: {}", change.id, change.summary);
    }
    Ok(())
}

async fn cmd_ingest(
    settings: &Settings,
    domain: &str,
    document_type: DocumentType,
    url: &str,
    file: &Path,
) -> Result<()> {
    let text = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read policy text from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read policy text: {}", file.display()))?
    };

    let db = connect_db().await?;
    let pipeline = PolicyPipeline::with_change_tracking(
        build_cache(settings, &db)?,
        build_analyzer(settings)?,
        db.change_repo(),
    );

    let result = with_guidance(
        pipeline
            .ingest_text(domain, document_type, url, text.trim())
            .await,
    )?;

    println!(
        "Stored version {} for {domain} {document_type} (score {})",
        result.version.id, result.version.score
    );
    if let Some(change) = result.change {
        println!("  change {}: {}", change.id, change.summary);
    }
    Ok(())
}

/// One row of `history` output. Each stored row has distinct content, so
/// there is no per-row change marker.
fn history_line(version: &PolicyVersion) -> String {
    format!(
        "{} {} (score: {}, words: {}, hash: {}...)",
        version.analyzed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        version.id,
        version.score,
        version.word_count,
        &version.content_hash[..8.min(version.content_hash.len())],
    )
}

async fn cmd_history(domain: &str, document_type: DocumentType, limit: usize) -> Result<()> {
    let repo = connect_db().await?.version_repo();
    let history = repo.get_history(domain, document_type, limit).await?;

    if history.is_empty() {
        println!("No versions found for {domain} {document_type}");
        return Ok(());
    }

    println!("Version history for {domain} {document_type}:\n");

    for version in &history {
        println!("  {}", history_line(version));
    }

    println!("\nTotal: {} versions", history.len());
    Ok(())
}

async fn cmd_diff(version_a: Uuid, version_b: Uuid, json: bool) -> Result<()> {
    let engine = DiffEngine::new(connect_db().await?.version_repo());
    let diff = engine.compare(version_a, version_b).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    println!("{} -> {}", diff.old_version_id, diff.new_version_id);
    println!(
        "Score delta: {:+}, word count delta: {:+}",
        diff.score_delta, diff.word_count_delta
    );
    for field in diff.changed_fields() {
        println!("  ~ {}: {} -> {}", field.key, field.old, field.new);
    }
    if !diff.has_text_changes() {
        println!("No text changes ({} paragraphs unchanged)", diff.text.unchanged);
        return Ok(());
    }
    for paragraph in &diff.text.removed {
        println!("- {paragraph}");
    }
    for paragraph in &diff.text.added {
        println!("+ {paragraph}");
    }
    println!(
        "\n{} added, {} removed, {} unchanged",
        diff.text.added.len(),
        diff.text.removed.len(),
        diff.text.unchanged
    );
    Ok(())
}

async fn cmd_recheck(settings: &Settings, targets: &[MonitorTarget], delay_secs: u64) -> Result<()> {
    let db = connect_db().await?;
    let monitor = build_monitor(
        settings,
        &db,
        Duration::from_secs(delay_secs),
        MonitorConfig::default().interval,
    )?;

    let results = monitor.recheck_all(targets, &TracingMonitorReporter).await;

    let mut failed = 0;
    for (target, result) in &results {
        match result {
            Ok(outcome) => match &outcome.change {
                Some(change) => println!("[CHANGED] {target}: {}", change.summary),
                None => println!("[unchanged] {target}"),
            },
            Err(e) => {
                failed += 1;
                println!("[failed] {target}: {e}. {}", e.user_guidance());
            }
        }
    }

    if failed == results.len() && !results.is_empty() {
        anyhow::bail!("All {failed} rechecks failed");
    }
    Ok(())
}

async fn cmd_monitor(
    settings: &Settings,
    targets: &[MonitorTarget],
    interval_hours: u64,
    delay_secs: u64,
) -> Result<()> {
    let db = connect_db().await?;
    let monitor = build_monitor(
        settings,
        &db,
        Duration::from_secs(delay_secs),
        Duration::from_secs(interval_hours * 60 * 60),
    )?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    monitor.run(targets, cancel, &TracingMonitorReporter).await?;
    Ok(())
}

async fn cmd_changes(domain: Option<&str>, limit: usize) -> Result<()> {
    let repo = connect_db().await?.change_repo();
    let changes = repo.list_open(domain, limit).await?;

    if changes.is_empty() {
        println!("No open changes");
        return Ok(());
    }

    for change in &changes {
        println!(
            "  {} {} {} {} (score {} -> {}, {:+})\n      {}",
            change.detected_at.format("%Y-%m-%d %H:%M:%S UTC"),
            change.id,
            change.domain,
            change.document_type,
            change.previous_score,
            change.current_score,
            change.score_delta,
            change.summary,
        );
    }
    println!("\nTotal: {} open changes", changes.len());
    Ok(())
}

async fn cmd_dismiss(change_id: Uuid) -> Result<()> {
    let repo = connect_db().await?.change_repo();
    if repo.dismiss(change_id).await? {
        println!("Dismissed {change_id}");
    } else {
        println!("No open change with id {change_id}");
    }
    Ok(())
}
