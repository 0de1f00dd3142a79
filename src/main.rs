//! vibemq-storage - inspect VibeMQ durable session storage
//!
//! Usage:
//!   vibemq-storage [OPTIONS] <COMMAND>
//!
//! Commands:
//!   subs <CLIENT_ID>     List stored subscriptions
//!   count <CLIENT_ID>    Count stored subscriptions
//!   msgs <CLIENT_ID>     List queued messages
//!   pkgids <CLIENT_ID>   List locked packet identifiers
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -p, --path <DIR>       Storage root (default: $HOME/.vibemq-storage)
//!   --buckets <N>          Subscription bucket count (default: 4096)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!
//! Read-only: nothing under the storage root is created or modified.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vibemq_storage::config::Config;
use vibemq_storage::storage::{SessionConn, SessionStore, StorageRoot};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Inspect VibeMQ durable session storage
#[derive(Parser, Debug)]
#[command(name = "vibemq-storage")]
#[command(author = "VibeMQ Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Inspect VibeMQ durable session storage")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage root directory
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Subscription bucket count
    #[arg(long)]
    buckets: Option<u32>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored subscriptions of a client
    Subs { client_id: String },
    /// Count stored subscriptions of a client
    Count { client_id: String },
    /// List queued messages of a client, oldest first
    Msgs { client_id: String },
    /// List locked packet identifiers of a client
    Pkgids { client_id: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // CLI args override file config
    if let Some(path) = args.path {
        config.storage.path = Some(path);
    }
    if let Some(buckets) = args.buckets {
        config.storage.bucket_count = buckets;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // Setup logging - CLI overrides config, config overrides default (warn)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let root: StorageRoot = config.storage.resolve_root();
    info!(
        "Storage root: {} ({} buckets)",
        root.path().display(),
        root.bucket_count()
    );

    let store = SessionStore::with_root(root);

    match args.command {
        Command::Subs { client_id } => {
            let conn = SessionConn::durable(client_id);
            for (filter, qos) in store.subscriptions(&conn) {
                println!("{}\t{}", qos, filter);
            }
        }
        Command::Count { client_id } => {
            let conn = SessionConn::durable(client_id);
            println!("{}", store.subscription_count(&conn));
        }
        Command::Msgs { client_id } => {
            for message in store.pending_messages(&client_id)? {
                let header = message.header;
                println!(
                    "{}\t{}\t{}\t{}.{:06}\t{}",
                    header.packet_id,
                    header.qos,
                    header.size,
                    header.stamp.secs,
                    header.stamp.micros,
                    message.handle
                );
            }
        }
        Command::Pkgids { client_id } => {
            for packet_id in store.locked_packet_ids(&client_id)? {
                println!("{}", packet_id);
            }
        }
    }

    Ok(())
}
