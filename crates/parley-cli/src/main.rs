mod config;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use config::ParleyConfig;
use parley_agent::GeminiBackend;
use parley_channels::{Channel, ConsoleChannel, TelegramChannel, TransportEvent};
use parley_core::{ParleyError, ParleyResult};
use parley_dispatch::{run_event_loop, SessionRouter, TurnDispatcher};
use parley_session::InMemorySessionStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TRANSPORT_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "parley", about = "Parley: relay chat messages to a generative AI model")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "parley.toml", global = true)]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start relaying messages
    Run {
        /// Chat transport to connect
        #[arg(short, long, value_enum, default_value_t = Transport::Telegram)]
        transport: Transport,
    },
    /// Print the rendered persona prompt and greeting
    Persona,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Transport {
    Telegram,
    Console,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Why the relay loop stopped.
enum Stop {
    EventsClosed(ParleyResult<()>),
    TransportExited(Result<ParleyResult<()>, JoinError>),
    Interrupted,
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Load .env before the subscriber so RUST_LOG from it applies.
    let dotenv = dotenvy::dotenv();
    init_tracing(cli.log_format);

    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load .env file"),
    }

    let mut config = ParleyConfig::load(&cli.config)?;
    config.apply_env(|key| std::env::var(key).ok());

    match cli.command {
        Commands::Run { transport } => run(config, transport).await,
        Commands::Persona => {
            let persona = config.persona();
            println!("System prompt:\n{}\n", persona.system_prompt());
            println!("Greeting:\n{}", persona.greeting());
            Ok(())
        }
    }
}

async fn run(config: ParleyConfig, transport: Transport) -> anyhow::Result<()> {
    config.validate()?;

    let persona = config.persona();
    info!(
        bot = %persona.bot_name,
        model = %config.model.model_id,
        ?transport,
        "Starting Parley relay"
    );

    let store = Arc::new(InMemorySessionStore::new(persona));
    let backend = Arc::new(GeminiBackend::new(config.model.clone()));
    let (channel, mut events) = connect(&config, transport)?;

    let dispatcher = Arc::new(TurnDispatcher::new(
        store,
        backend,
        channel.clone(),
        config.dispatcher_config(),
    ));
    let router = SessionRouter::new(dispatcher);

    let mut transport_task = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.run().await })
    };

    let stop = tokio::select! {
        res = run_event_loop(&mut events, &router) => Stop::EventsClosed(res),
        res = &mut transport_task => Stop::TransportExited(res),
        _ = tokio::signal::ctrl_c() => Stop::Interrupted,
    };
    let transport_done = matches!(stop, Stop::TransportExited(_));

    let result = match stop {
        Stop::EventsClosed(res) => res.map_err(anyhow::Error::from),
        Stop::TransportExited(Ok(Ok(()))) => {
            info!("Transport finished, waiting for pending replies");
            events.close();
            let flushed = run_event_loop(&mut events, &router).await;
            let grace = Duration::from_secs(config.relay.call_timeout_secs);
            if tokio::time::timeout(grace, router.drain()).await.is_err() {
                warn!("Pending exchanges did not finish in time");
            }
            flushed.map_err(anyhow::Error::from)
        }
        Stop::TransportExited(Ok(Err(e))) => Err(e.into()),
        Stop::TransportExited(Err(e)) => Err(anyhow::anyhow!("Transport task failed: {e}")),
        Stop::Interrupted => {
            info!("Interrupt received, shutting down");
            Ok(())
        }
    };

    if let Err(e) = channel.shutdown().await {
        warn!(error = %e, "Transport shutdown failed");
    }
    if !transport_done {
        match tokio::time::timeout(TRANSPORT_STOP_GRACE, &mut transport_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "Transport exited with an error"),
            Ok(Err(e)) => warn!(error = %e, "Transport task failed"),
            Err(_) => {
                warn!("Transport did not stop in time");
                transport_task.abort();
            }
        }
    }

    info!("Parley relay stopped");
    result
}

fn connect(
    config: &ParleyConfig,
    transport: Transport,
) -> anyhow::Result<(Arc<dyn Channel>, mpsc::Receiver<TransportEvent>)> {
    let buffer = config.relay.event_buffer;
    match transport {
        Transport::Telegram => {
            let settings = &config.telegram;
            if settings.bot_token.trim().is_empty() {
                return Err(ParleyError::Config(
                    "TELEGRAM_BOT_TOKEN is not set (telegram.bot_token)".into(),
                )
                .into());
            }
            let mut telegram = TelegramChannel::new(settings.bot_token.as_str(), buffer)
                .with_poll_timeout(settings.poll_timeout_secs);
            if let Some(base) = &settings.api_base_url {
                telegram = telegram.with_api_base(base.as_str());
            }
            let events = telegram
                .take_event_receiver()
                .context("Telegram event receiver already taken")?;
            let channel: Arc<dyn Channel> = Arc::new(telegram);
            Ok((channel, events))
        }
        Transport::Console => {
            let mut console = ConsoleChannel::new("console", buffer);
            let events = console
                .take_event_receiver()
                .context("Console event receiver already taken")?;
            let channel: Arc<dyn Channel> = Arc::new(console);
            Ok((channel, events))
        }
    }
}
