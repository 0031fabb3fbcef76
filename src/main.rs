//! CLI Vestnik
//!
//! Публикация в топик брокера и прослушивание топика из командной строки.
//! Конфигурация берётся из `PubSubConfig::load_from` (файл и переменные
//! `VESTNIK_*`), флаги переопределяют адрес брокера и префикс.

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info};
use vestnik::{
    config::PubSubConfig,
    logging::{init_logging, LogFormat, LoggingConfig},
    pubsub::{sync_subscriber, ChannelRegistry, ListenerState, Message},
};

/// Основная структура CLI аргументов
#[derive(Parser)]
#[command(name = "vestnik")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Vestnik CLI - publish to and listen on broker-backed channels", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Файл конфигурации (TOML, YAML или JSON)
    #[arg(short, long, env = "VESTNIK_CONFIG")]
    config: Option<PathBuf>,
    /// Хост брокера
    #[arg(short = 'H', long)]
    host: Option<String>,
    /// Порт брокера
    #[arg(short, long)]
    port: Option<u16>,
    /// Номер базы брокера
    #[arg(long)]
    db: Option<u32>,
    /// Префикс топиков на стороне брокера
    #[arg(long)]
    prefix: Option<String>,
    /// Формат логов
    #[arg(long, value_enum, default_value = "compact")]
    log_format: LogFormatArg,
    /// Подробный вывод (debug)
    #[arg(short, long)]
    verbose: bool,
    /// Только предупреждения и ошибки
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

/// Подкоманды CLI
#[derive(Subcommand)]
enum Commands {
    /// Опубликовать сообщение
    #[command(alias = "pub")]
    Publish {
        topic: String,
        message: String,
        /// Разобрать сообщение как JSON
        #[arg(long)]
        json: bool,
    },
    /// Печатать сообщения топика в stdout
    #[command(alias = "sub")]
    Listen {
        topic: String,
        /// Выйти после N сообщений
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Сколько секунд ждать готовности подписки
        #[arg(long, default_value = "10")]
        ready_timeout: u64,
    },
    /// Версия, сборка и итоговая конфигурация
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = init_logging(LoggingConfig {
        level: if cli.verbose {
            "debug"
        } else if cli.quiet {
            "warn"
        } else {
            "info"
        }
        .to_string(),
        format: match cli.log_format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        },
        ..LoggingConfig::default()
    })?;

    let config = build_config(&cli)?;
    let result = match cli.command {
        Commands::Publish {
            topic,
            message,
            json,
        } => publish(config, &topic, &message, json).await,
        Commands::Listen {
            topic,
            count,
            ready_timeout,
        } => listen(config, &topic, count, Duration::from_secs(ready_timeout)).await,
        Commands::Info => info_cmd(&config),
    };

    logging.shutdown();
    result
}

fn build_config(cli: &Cli) -> Result<PubSubConfig> {
    let mut config =
        PubSubConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    config.broker_enabled = true;
    if let Some(host) = &cli.host {
        config.broker.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.broker.port = port;
    }
    if let Some(db) = cli.db {
        config.broker.db = db;
    }
    if let Some(prefix) = &cli.prefix {
        config.broker.channel_prefix = prefix.clone();
    }
    config.validate()?;
    debug!(?config, "configuration resolved");
    Ok(config)
}

async fn connect(config: PubSubConfig) -> Result<ChannelRegistry> {
    let address = config.broker.address();
    let registry = ChannelRegistry::new(config).await;
    if !registry.is_distributed() {
        bail!("broker at {address} is unavailable");
    }
    Ok(registry)
}

async fn publish(
    config: PubSubConfig,
    topic: &str,
    raw: &str,
    json: bool,
) -> Result<()> {
    let message = if json {
        let value: serde_json::Value =
            serde_json::from_str(raw).context("message is not valid JSON")?;
        Message::structured(value)
    } else {
        Message::text(raw)
    };

    let registry = connect(config).await?;
    let broker_topic = format!("{}{topic}", registry.channel_prefix());
    registry.publish(topic, message).await;
    info!(topic = %broker_topic, "message published");
    registry.shutdown().await;
    Ok(())
}

async fn listen(
    config: PubSubConfig,
    topic: &str,
    count: Option<usize>,
    ready_timeout: Duration,
) -> Result<()> {
    let registry = connect(config).await?;
    let handle = registry.get_or_create(topic);
    let Some(channel) = handle.as_distributed() else {
        bail!("channel '{topic}' is not connected to the broker");
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    handle.subscribe(sync_subscriber(move |msg| {
        // Получатель закрывается только при выходе из команды.
        let _ = tx.send(msg.clone());
        Ok(())
    }));

    let state = channel
        .wait_for_listener(|s| s.is_active() || s.is_stopped(), ready_timeout)
        .await;
    match state {
        Some(ListenerState::Stopped(reason)) => {
            registry.shutdown().await;
            bail!("subscription to '{}' failed: {reason:?}", channel.broker_topic());
        }
        None => {
            registry.shutdown().await;
            bail!("subscription to '{}' not ready in time", channel.broker_topic());
        }
        Some(_) => info!(topic = channel.broker_topic(), "listening"),
    }

    let mut received = 0usize;
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                println!("{msg}");
                received += 1;
                if count.is_some_and(|n| received >= n) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    registry.shutdown().await;
    info!(received, "listener finished");
    Ok(())
}

fn info_cmd(config: &PubSubConfig) -> Result<()> {
    let mut shown = config.clone();
    if shown.broker.password.is_some() {
        shown.broker.password = Some("***".to_string());
    }
    println!("vestnik {}", env!("CARGO_PKG_VERSION"));
    println!("commit:  {}", env!("VESTNIK_GIT_COMMIT"));
    println!("built:   {}", env!("VESTNIK_BUILD_TIME"));
    println!(
        "redis-broker feature: {}",
        cfg!(feature = "redis-broker")
    );
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}
