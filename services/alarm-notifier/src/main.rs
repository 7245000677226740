//! Alarm notifier service
//!
//! `serve` runs the queue consumer and the HTTP API. The remaining
//! subcommands manage destination mappings and the queue for operators.

use alarm_notifier::api::{create_router, ApiState};
use alarm_notifier::{BatchCoordinator, QueueConsumer, RedisBackends, Settings};
use alarm_store::{DestinationRegistry, DestinationStore, QueueRecord, RecordQueue};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the queue consumer and the HTTP API
    Serve,

    /// Map an alarm identity to a chat destination
    Register {
        /// Alarm identity (ARN)
        identity: String,
        /// Chat channel id
        destination: String,
    },

    /// Remove a destination mapping
    Unregister {
        identity: String,
        destination: String,
    },

    /// List the destinations of an alarm identity
    Destinations { identity: String },

    /// Push a record onto the queue
    ///
    /// The file holds either a full queue record or just the record body.
    Enqueue {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print records parked in the dead-letter list
    DeadLetters,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref())?;
    common::logging::init(&settings.logging)?;

    match args.command {
        Some(Commands::Serve) | None => serve(&settings).await?,
        Some(Commands::Register {
            identity,
            destination,
        }) => {
            let backends = RedisBackends::connect(&settings).await?;
            if backends.registry().register(&identity, &destination).await? {
                println!("Registered {} -> {}", identity, destination);
            } else {
                println!("{} -> {} already registered", identity, destination);
            }
        },
        Some(Commands::Unregister {
            identity,
            destination,
        }) => {
            let backends = RedisBackends::connect(&settings).await?;
            if backends.registry().unregister(&identity, &destination).await? {
                println!("Removed {} -> {}", identity, destination);
            } else {
                println!("{} -> {} was not registered", identity, destination);
            }
        },
        Some(Commands::Destinations { identity }) => {
            let backends = RedisBackends::connect(&settings).await?;
            for destination in backends.registry().query(&identity).await? {
                println!("{}", destination);
            }
        },
        Some(Commands::Enqueue { file }) => {
            let record = read_record(&file)?;
            let backends = RedisBackends::connect(&settings).await?;
            backends.queue().push(&record).await?;
            println!("Enqueued {}", record.message_id);
        },
        Some(Commands::DeadLetters) => {
            let backends = RedisBackends::connect(&settings).await?;
            for record in backends.queue().dead_letters().await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        },
    }

    Ok(())
}

async fn serve(settings: &Settings) -> Result<()> {
    info!("Starting alarm notifier");

    let backends = RedisBackends::connect(settings).await?;
    let context = backends.notifier_context(settings)?;
    let coordinator = Arc::new(BatchCoordinator::new(&context));
    let shutdown = common::shutdown::shutdown_token();

    let consumer_handle = if settings.queue.enabled {
        let consumer = QueueConsumer::new(
            backends.queue(),
            coordinator.clone(),
            settings.queue.clone(),
        );
        let token = shutdown.clone();
        Some(tokio::spawn(async move { consumer.run(token).await }))
    } else {
        info!("Queue consumer disabled");
        None
    };

    if settings.api.enabled {
        let app = create_router(Arc::new(ApiState::new(coordinator)));
        let listener = tokio::net::TcpListener::bind(&settings.api.bind)
            .await
            .with_context(|| format!("Failed to bind {}", settings.api.bind))?;
        info!("HTTP API listening on {}", settings.api.bind);

        let token = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("HTTP server failed")?;
    } else {
        shutdown.cancelled().await;
    }

    if let Some(handle) = consumer_handle {
        if let Err(e) = handle.await {
            error!("Queue consumer task failed: {}", e);
        }
    }

    info!("Alarm notifier stopped");
    Ok(())
}

fn read_record(path: &Path) -> Result<QueueRecord> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    match serde_json::from_str::<QueueRecord>(&content) {
        Ok(record) => Ok(record),
        Err(_) => Ok(QueueRecord::new(
            uuid::Uuid::new_v4().to_string(),
            content.trim().to_string(),
        )),
    }
}
