#![forbid(unsafe_code)]

//! `cast-dispatch`: scheduling and dispatch engine binary.
//!
//! Loads configuration, opens the item store, wires the delivery backends,
//! and runs either the polling loop or a single operator command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use cast_dispatch::backend::{
    BackendSet, DeliveryBackend, DirectApiAdapter, RelayAdapter, WebhookAdapter, DEFAULT_TIMEOUT,
};
use cast_dispatch::clock::{parse_schedule, Clock, SystemClock};
use cast_dispatch::credentials::{ConfigCredentialSource, CredentialClientPool};
use cast_dispatch::models::item::{ContentKind, ContentStatus, Destination, Payload};
use cast_dispatch::orchestrator::dispatcher::Dispatcher;
use cast_dispatch::orchestrator::item_manager::{ItemManager, NewItem};
use cast_dispatch::orchestrator::scheduler::Scheduler;
use cast_dispatch::persistence::db;
use cast_dispatch::persistence::history_repo::HistoryRepo;
use cast_dispatch::persistence::item_repo::ItemRepo;
use cast_dispatch::policy::retry::RetryPolicy;
use cast_dispatch::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum KindArg {
    Post,
    Retweet,
    QuoteRetweet,
}

impl From<KindArg> for ContentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Post => Self::Post,
            KindArg::Retweet => Self::Retweet,
            KindArg::QuoteRetweet => Self::QuoteRetweet,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum DestinationArg {
    DirectApi,
    Relay,
    Webhook,
    Auto,
}

impl From<DestinationArg> for Destination {
    fn from(destination: DestinationArg) -> Self {
        match destination {
            DestinationArg::DirectApi => Self::DirectApi,
            DestinationArg::Relay => Self::Relay,
            DestinationArg::Webhook => Self::Webhook,
            DestinationArg::Auto => Self::Auto,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum StatusArg {
    Draft,
    Approved,
    Scheduled,
    Sent,
    Failed,
    Discarded,
}

impl From<StatusArg> for ContentStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Draft => Self::Draft,
            StatusArg::Approved => Self::Approved,
            StatusArg::Scheduled => Self::Scheduled,
            StatusArg::Sent => Self::Sent,
            StatusArg::Failed => Self::Failed,
            StatusArg::Discarded => Self::Discarded,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "cast-dispatch", about = "Content scheduling and dispatch engine", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Read owner tokens from environment variables only.
    #[arg(long)]
    no_keychain: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll for due items on the configured interval until interrupted.
    Run,

    /// Run a single poll batch.
    Poll,

    /// Create a draft.
    Create {
        /// Owning cast.
        #[arg(long)]
        owner: String,
        /// Action kind.
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Post text.
        #[arg(long)]
        text: Option<String>,
        /// Image URL; repeat for several.
        #[arg(long = "image")]
        images: Vec<String>,
        /// Remote id of the post to repost.
        #[arg(long)]
        target: Option<String>,
        /// Quote comment.
        #[arg(long)]
        comment: Option<String>,
        /// Delivery backend.
        #[arg(long, value_enum, default_value_t = DestinationArg::Auto)]
        destination: DestinationArg,
        /// Delivery time (RFC 3339, or naive in the canonical offset).
        #[arg(long)]
        at: Option<String>,
    },

    /// Approve a draft.
    Approve {
        /// Content item ID.
        id: String,
    },

    /// Schedule an approved item.
    Schedule {
        /// Content item ID.
        id: String,
        /// Delivery time; defaults to the time given at creation.
        #[arg(long)]
        at: Option<String>,
    },

    /// Dispatch a scheduled item now, regardless of its time.
    Execute {
        /// Content item ID.
        id: String,
    },

    /// Reschedule a failed item.
    Reschedule {
        /// Content item ID.
        id: String,
        /// New delivery time.
        #[arg(long, conflicts_with = "after_hours")]
        at: Option<String>,
        /// Delay from now, in hours.
        #[arg(long)]
        after_hours: Option<u32>,
    },

    /// Discard an item.
    Discard {
        /// Content item ID.
        id: String,
    },

    /// Convert a duplicate retweet into a quote retweet draft.
    Convert {
        /// Content item ID.
        id: String,
        /// Quote comment.
        #[arg(long)]
        comment: String,
    },

    /// Delete a discarded item.
    Purge {
        /// Content item ID.
        id: String,
    },

    /// Show an item with its recovery options.
    Show {
        /// Content item ID.
        id: String,
    },

    /// List items by status or owner.
    List {
        /// Filter by status.
        #[arg(long, value_enum, conflicts_with = "owner")]
        status: Option<StatusArg>,
        /// Filter by owner.
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show delivery attempts for an item.
    History {
        /// Content item ID.
        id: String,
    },
}

struct Engine {
    manager: ItemManager,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!("configuration loaded");

    let db = Arc::new(db::connect(&config.db_path).await?);
    info!("database connected");

    let engine = build_engine(&config, db, !args.no_keychain)?;

    match args.command {
        Command::Run => serve(&engine, &config).await,
        Command::Poll => print_json(&engine.scheduler.poll_once().await?),
        Command::Create {
            owner,
            kind,
            text,
            images,
            target,
            comment,
            destination,
            at,
        } => {
            let kind = ContentKind::from(kind);
            let payload = match kind {
                ContentKind::Post => Payload::Post {
                    text: text.unwrap_or_default(),
                    image_refs: images,
                },
                ContentKind::Retweet | ContentKind::QuoteRetweet => Payload::Repost {
                    target_ref: target.ok_or_else(|| {
                        AppError::Validation("--target is required for reposts".into())
                    })?,
                    comment,
                },
            };
            let scheduled_at = at
                .map(|raw| parse_schedule(&raw, engine.clock.offset()))
                .transpose()?;
            let item = engine
                .manager
                .create_draft(NewItem {
                    owner_id: owner,
                    kind,
                    payload,
                    destination: destination.into(),
                    scheduled_at,
                })
                .await?;
            print_json(&item)
        }
        Command::Approve { id } => print_json(&engine.manager.approve(&id).await?),
        Command::Schedule { id, at } => {
            let at = at
                .map(|raw| parse_schedule(&raw, engine.clock.offset()))
                .transpose()?;
            print_json(&engine.manager.schedule(&id, at).await?)
        }
        Command::Execute { id } => print_json(&engine.scheduler.execute_now(&id).await?),
        Command::Reschedule {
            id,
            at,
            after_hours,
        } => {
            let item = match (at, after_hours) {
                (Some(raw), _) => {
                    let at = parse_schedule(&raw, engine.clock.offset())?;
                    engine.manager.reschedule_at(&id, at).await?
                }
                (None, Some(hours)) => {
                    engine
                        .manager
                        .reschedule_after(&id, chrono::Duration::hours(i64::from(hours)))
                        .await?
                }
                (None, None) => {
                    return Err(AppError::Validation(
                        "either --at or --after-hours is required".into(),
                    ))
                }
            };
            print_json(&item)
        }
        Command::Discard { id } => print_json(&engine.manager.discard(&id).await?),
        Command::Convert { id, comment } => print_json(
            &engine
                .manager
                .convert_duplicate_to_quote(&id, &comment)
                .await?,
        ),
        Command::Purge { id } => {
            engine.manager.purge(&id).await?;
            println!("purged {id}");
            Ok(())
        }
        Command::Show { id } => {
            let item = engine.manager.get(&id).await?;
            let options: Vec<String> = engine
                .manager
                .remediation_options(&id)
                .await?
                .into_iter()
                .map(|option| option.label())
                .collect();
            print_json(&serde_json::json!({ "item": item, "options": options }))
        }
        Command::List { status, owner } => {
            let items = match (status, owner) {
                (_, Some(owner)) => engine.manager.list_by_owner(&owner).await?,
                (Some(status), None) => engine.manager.list_by_status(status.into()).await?,
                (None, None) => engine.manager.list_by_status(ContentStatus::Scheduled).await?,
            };
            print_json(&items)
        }
        Command::History { id } => print_json(&engine.manager.history(&id).await?),
    }
}

fn build_engine(config: &GlobalConfig, db: Arc<db::Database>, use_keychain: bool) -> Result<Engine> {
    let offset = config.offset()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(offset));

    let source = Arc::new(ConfigCredentialSource::new(&config.owners, use_keychain));
    let pool = Arc::new(CredentialClientPool::new(source, DEFAULT_TIMEOUT));

    let mut backends = BackendSet::new();
    if let Some(endpoint) = &config.direct_api {
        let adapter: Arc<dyn DeliveryBackend> =
            Arc::new(DirectApiAdapter::new(endpoint, Arc::clone(&pool)));
        backends = backends.with_direct_api(adapter);
    }
    if let Some(endpoint) = &config.relay {
        let adapter: Arc<dyn DeliveryBackend> = Arc::new(RelayAdapter::new(
            endpoint,
            Arc::clone(&pool),
            Arc::clone(&clock),
        ));
        backends = backends.with_relay(adapter);
    }
    if let Some(endpoint) = &config.webhook {
        let adapter: Arc<dyn DeliveryBackend> = Arc::new(WebhookAdapter::new(
            endpoint,
            Arc::clone(&pool),
            Arc::clone(&clock),
        ));
        backends = backends.with_webhook(adapter);
    }

    let items = ItemRepo::with_offset(Arc::clone(&db), offset);
    let history = HistoryRepo::new(db);

    let dispatcher = Dispatcher::new(
        items.clone(),
        history.clone(),
        backends,
        Arc::clone(&clock),
        RetryPolicy::from_config(&config.retry),
    )
    .with_lease(config.claim_lease());

    Ok(Engine {
        manager: ItemManager::new(items.clone(), history, Arc::clone(&clock)),
        scheduler: Arc::new(Scheduler::new(items, Arc::new(dispatcher), Arc::clone(&clock))),
        clock,
    })
}

async fn serve(engine: &Engine, config: &GlobalConfig) -> Result<()> {
    let ct = CancellationToken::new();
    let handle = Arc::clone(&engine.scheduler).spawn_poll_task(config.poll_interval(), ct.clone());
    info!(
        interval_seconds = config.poll_interval_seconds,
        "poll loop started"
    );

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Err(err) = handle.await {
        warn!(%err, "poll task ended abnormally");
    }
    info!("cast-dispatch shut down");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
