//! couchdb-utils - CouchDB Administration Toolkit
//!
//! Command line front end for the couchdb-utils library.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use couchdb_utils::client::{parse_host, CouchClient};
use couchdb_utils::config::{CouchConfig, DEFAULT_CONFIG_FILE, REQUEST_LOG_DIRECTIVE};
use couchdb_utils::databases::{delete_documents, list_databases, list_databases_on};
use couchdb_utils::fanout::FanoutExecutor;
use couchdb_utils::output::{self, Format};
use couchdb_utils::replication::{self, ConflictPolicy, ReplicationOptions, ReplicatorRegistry};
use couchdb_utils::resource::{Database, Document, View};
use couchdb_utils::{server, views};

/// couchdb-utils - CouchDB Administration Toolkit
#[derive(Parser)]
#[command(name = "couchdb-utils")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// CouchDB URL, credentials may be embedded [default: http://localhost:5984]
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Path to configuration file [default: couchdb-utils.toml when present]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text, uri, json)
    #[arg(long, global = true, default_value = "text")]
    format: Format,

    /// Log every request at info level
    #[arg(long, global = true)]
    log_requests: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases
    Databases,

    /// List views of the given databases, or of every database
    Views {
        /// Database names or URLs ("-" reads them from stdin)
        databases: Vec<String>,
    },

    /// List replication jobs and their state
    Replicators,

    /// Pull databases from other servers into this one
    Replicate {
        /// Source database URLs ("-" reads them from stdin)
        sources: Vec<String>,

        /// Also pull every database of this server
        #[arg(long, value_name = "HOST")]
        all_from: Option<String>,

        /// Keep replicating after catching up
        #[arg(long)]
        continuous: bool,

        /// Create missing target databases
        #[arg(long)]
        create_target: bool,

        /// On a revision conflict: abort or continue
        #[arg(long, value_name = "POLICY")]
        on_conflict: Option<ConflictPolicy>,
    },

    /// Delete replication jobs
    DeleteReplicator {
        /// Job ids ("-" reads them from stdin)
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        ids: Vec<String>,

        /// Delete every job
        #[arg(long)]
        all: bool,
    },

    /// Delete documents at their current revision
    Delete {
        /// Document paths or URLs ("-" reads them from stdin)
        #[arg(required = true)]
        documents: Vec<String>,
    },

    /// Trigger a background index update of views
    Refresh {
        /// View URLs or "database design view" tuples; every view when empty
        views: Vec<String>,

        /// Maximum requests in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Give up on requests not yet sent after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,

        /// Request every view instead of one per design document
        #[arg(long)]
        every_view: bool,
    },

    /// Show the authenticated user
    Session,

    /// Show server version information
    Server,

    /// List running tasks
    Tasks {
        /// Only tasks of this type (replication, indexer, ...)
        #[arg(long = "type", value_name = "TYPE")]
        kind: Option<String>,
    },

    /// Show server statistics
    Stats {
        section: Option<String>,
        key: Option<String>,
    },

    /// Write a configuration file with default values
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_logging(&config)?;

    let client = CouchClient::from_config(&config.server).context("failed to create CouchDB client")?;
    run_command(cli.command, &client, &config, cli.format).await
}

/// Load configuration and apply command line overrides
fn load_config(cli: &Cli) -> anyhow::Result<CouchConfig> {
    let mut config = CouchConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    if let Some(server) = &cli.server {
        config.server.url = server.clone();
    }
    if cli.log_requests {
        config.server.log_requests = true;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Initialize logging
fn init_logging(config: &CouchConfig) -> anyhow::Result<()> {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) if config.server.log_requests => filter.add_directive(REQUEST_LOG_DIRECTIVE.parse()?),
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new(config.log_directives())
            .context("invalid logging.level")?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

/// Print rendered output, skipping empty results
fn emit(rendered: String) {
    if !rendered.is_empty() {
        println!("{}", rendered);
    }
}

/// A lone "-" argument means one item per line on stdin
fn args_or_stdin(args: Vec<String>) -> anyhow::Result<Vec<String>> {
    if args.len() != 1 || args[0] != "-" {
        return Ok(args);
    }

    let mut items = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        if !line.trim().is_empty() {
            items.push(line);
        }
    }
    Ok(items)
}

async fn run_command(
    command: Commands,
    client: &CouchClient,
    config: &CouchConfig,
    format: Format,
) -> anyhow::Result<()> {
    match command {
        Commands::Databases => {
            let dbs = list_databases(client).await?;
            emit(output::databases(&dbs, client, format)?);
            Ok(())
        }
        Commands::Views { databases } => run_views(client, args_or_stdin(databases)?, format).await,
        Commands::Replicators => {
            let registry = ReplicatorRegistry::fetch(client).await?;
            emit(output::replicators(&registry, client, format)?);
            Ok(())
        }
        Commands::Replicate {
            sources,
            all_from,
            continuous,
            create_target,
            on_conflict,
        } => {
            let mut options = ReplicationOptions::from(&config.replication);
            options.continuous |= continuous;
            options.create_target |= create_target;
            if let Some(policy) = on_conflict {
                options.on_conflict = policy;
            }
            run_replicate(client, args_or_stdin(sources)?, all_from, options, format).await
        }
        Commands::DeleteReplicator { ids, all } => {
            let report = if all {
                let registry = ReplicatorRegistry::fetch(client).await?;
                replication::delete_all(client, &registry).await
            } else {
                replication::delete_jobs(client, &args_or_stdin(ids)?).await
            };
            emit(output::deletions(&report, format)?);
            report.into_result().context("failed to delete replication jobs")?;
            Ok(())
        }
        Commands::Delete { documents } => {
            let documents = args_or_stdin(documents)?
                .iter()
                .map(|raw| Document::parse(raw))
                .collect::<couchdb_utils::Result<Vec<_>>>()?;
            let report = delete_documents(client, &documents).await;
            emit(output::deletions(&report, format)?);
            report.into_result().context("failed to delete documents")?;
            Ok(())
        }
        Commands::Refresh {
            views,
            concurrency,
            deadline,
            every_view,
        } => {
            let mut fanout = config.fanout.clone();
            if let Some(concurrency) = concurrency {
                fanout.concurrency = concurrency;
            }
            if let Some(deadline) = deadline {
                fanout.deadline_secs = deadline;
            }
            if fanout.concurrency == 0 {
                bail!("--concurrency must be at least 1");
            }
            let executor = FanoutExecutor::from_config(&fanout);
            run_refresh(client, &executor, args_or_stdin(views)?, every_view, format).await
        }
        Commands::Session => {
            let session = server::session(client).await?;
            emit(output::session(&session, format)?);
            Ok(())
        }
        Commands::Server => {
            let info = server::server_info(client).await?;
            emit(output::server(&info, format)?);
            Ok(())
        }
        Commands::Tasks { kind } => {
            let tasks = server::active_tasks(client, kind.as_deref()).await?;
            emit(output::tasks(&tasks, format)?);
            Ok(())
        }
        Commands::Stats { section, key } => {
            let stats = match (&section, &key) {
                (Some(section), Some(key)) => {
                    server::stats(client, Some((section.as_str(), key.as_str()))).await?
                }
                (Some(section), None) => server::stats(client, None)
                    .await?
                    .into_iter()
                    .filter(|stat| &stat.section == section)
                    .collect(),
                _ => server::stats(client, None).await?,
            };
            emit(output::stats(&stats, format)?);
            Ok(())
        }
        Commands::Init { output } => run_init(&output),
        Commands::Validate => run_validate(client, config),
    }
}

async fn run_views(client: &CouchClient, names: Vec<String>, format: Format) -> anyhow::Result<()> {
    let dbs = if names.is_empty() {
        list_databases(client).await?
    } else {
        names
            .iter()
            .map(|raw| Database::parse(raw))
            .collect::<couchdb_utils::Result<Vec<_>>>()?
    };

    let views = views::list_views(client, &dbs).await?;
    emit(output::views(&views, client, format)?);
    Ok(())
}

async fn run_replicate(
    client: &CouchClient,
    sources: Vec<String>,
    all_from: Option<String>,
    options: ReplicationOptions,
    format: Format,
) -> anyhow::Result<()> {
    let mut candidates = sources
        .iter()
        .map(|raw| Database::parse(raw))
        .collect::<couchdb_utils::Result<Vec<_>>>()?;

    if let Some(host) = all_from {
        let host = parse_host(&host)?;
        candidates.extend(list_databases_on(client, &host).await?);
    }
    if candidates.is_empty() {
        bail!("nothing to replicate: give source databases or --all-from HOST");
    }

    let report = replication::pull(client, &candidates, options).await?;
    emit(output::reconcile(&report, format)?);

    if let Some(failure) = report.failure {
        return Err(anyhow::Error::new(failure.error)
            .context(format!("replication of {} failed", failure.database)));
    }
    Ok(())
}

async fn run_refresh(
    client: &CouchClient,
    executor: &FanoutExecutor,
    raw: Vec<String>,
    every_view: bool,
    format: Format,
) -> anyhow::Result<()> {
    let targets = if raw.is_empty() {
        let dbs = list_databases(client).await?;
        views::list_views(client, &dbs).await?
    } else {
        raw.iter()
            .map(|raw| View::parse(raw))
            .collect::<couchdb_utils::Result<Vec<_>>>()?
    };

    let report = views::refresh_views(client, executor, &targets, every_view).await;
    emit(output::refresh(&report, format)?);

    if !report.is_success() {
        bail!(
            "{} view refreshes failed, {} views refreshed",
            report.failed.len(),
            report.refreshed_count()
        );
    }
    Ok(())
}

/// Write a default configuration file
fn run_init(output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        bail!("{} already exists", output.display());
    }

    let content = toml::to_string_pretty(&CouchConfig::default())
        .context("failed to serialize default configuration")?;
    std::fs::write(output, content)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("Configuration written to {}", output.display());
    Ok(())
}

/// Validate the loaded configuration
fn run_validate(client: &CouchClient, config: &CouchConfig) -> anyhow::Result<()> {
    println!("✓ Configuration is valid");
    println!("  Server: {}", couchdb_utils::client::redact(client.host()));
    println!("  Request timeout: {}s", config.server.timeout_secs);
    println!("  Fan-out concurrency: {}", config.fanout.concurrency);
    match config.fanout_deadline() {
        Some(deadline) => println!("  Fan-out deadline: {}s", deadline.as_secs()),
        None => println!("  Fan-out deadline: none"),
    }
    println!("  Conflict policy: {:?}", config.replication.on_conflict);
    Ok(())
}
