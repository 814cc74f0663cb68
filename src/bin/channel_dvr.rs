#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use channel_dvr::api::{self, ApiState};
use channel_dvr::config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config};
use channel_dvr::dispatch::{ConfiguredBackends, MediaResolver, YtDlpResolver};
use channel_dvr::engine::Engine;
use channel_dvr::fetch::HttpFeedSource;
use channel_dvr::model::BackendKind;
use channel_dvr::scheduler::{ScheduleConfig, Scheduler};
use channel_dvr::store::Store;
use clap::{ArgAction, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_VIDEO_LIMIT: u32 = 50;

#[derive(Parser)]
#[command(name = "channel-dvr")]
#[command(version, about = "Watches channel feeds and queues new uploads for download")]
struct Cli {
    /// dotenv file with DVR_* settings
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Database path (overrides DVR_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control API and the scheduler
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Leave the scheduler idle until started over the API
        #[arg(long)]
        no_autostart: bool,
    },
    /// Run one pass over every channel, or check a single channel
    Check {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Manage tracked channels
    Channel {
        #[command(subcommand)]
        action: ChannelCommand,
    },
    /// Inspect stored videos or queue one manually
    Video {
        #[command(subcommand)]
        action: VideoCommand,
    },
    /// Show or edit the download backend settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Check that the resolver and the configured backend are reachable
    Doctor,
}

#[derive(Subcommand)]
enum ChannelCommand {
    Add { channel_id: String, name: String },
    List,
    Remove { channel_id: String },
}

#[derive(Subcommand)]
enum VideoCommand {
    List {
        #[arg(long, default_value_t = DEFAULT_VIDEO_LIMIT)]
        limit: u32,
    },
    /// Submit a stored video to the backend again
    Download { video_id: String },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long, value_parser = parse_backend)]
        backend: Option<BackendKind>,
        #[arg(long)]
        metube_url: Option<String>,
        #[arg(long)]
        aria2_host: Option<String>,
        #[arg(long)]
        aria2_port: Option<u16>,
        #[arg(long)]
        download_folder: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long, action = ArgAction::Set)]
        filter_shorts: Option<bool>,
    },
}

fn parse_backend(value: &str) -> Result<BackendKind, String> {
    BackendKind::parse(value).ok_or_else(|| format!("unknown backend {value:?} (metube, aria2)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let (host, port) = match &cli.command {
        Command::Serve { host, port, .. } => (host.clone(), *port),
        _ => (None, None),
    };
    let config = resolve_runtime_config(RuntimeOverrides {
        database: cli.database,
        host,
        port,
        env_path: cli.env_file,
    })?;

    let store = Store::open(&config.database)
        .await
        .context("initializing database")?;
    let resolver = Arc::new(YtDlpResolver::new(&config.ytdlp, config.resolve_timeout));
    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(HttpFeedSource::new(&config.feed_url, config.fetch_timeout)),
        Arc::new(ConfiguredBackends::new(
            config.backend_timeout,
            resolver.clone(),
        )),
        config.channel_delay,
    ));

    match cli.command {
        Command::Serve { no_autostart, .. } => serve(&config, engine, !no_autostart).await,
        Command::Check { channel: Some(channel_id) } => {
            let report = engine.check_channel(&channel_id).await?;
            print_json(&report)
        }
        Command::Check { channel: None } => {
            let summary = engine.run_pass().await?;
            print_json(&summary)
        }
        Command::Channel { action } => channel_command(&store, action).await,
        Command::Video { action } => video_command(&store, &engine, action).await,
        Command::Settings { action } => settings_command(&store, action).await,
        Command::Doctor => doctor(&engine, &resolver).await,
    }
}

async fn serve(config: &RuntimeConfig, engine: Arc<Engine>, autostart: bool) -> Result<()> {
    let scheduler = Scheduler::new(
        engine.clone(),
        ScheduleConfig {
            interval: config.check_interval,
            initial_delay: config.initial_delay,
        },
    );
    if autostart {
        scheduler.start();
    }

    let app = api::router(ApiState {
        engine,
        scheduler: scheduler.clone(),
    });
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding to {}:{}", config.host, config.port))?;
    let addr = listener.local_addr()?;
    info!(%addr, database = %config.database.display(), "control API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running control API")?;

    scheduler.stop();
    if scheduler.status().checking {
        info!("waiting for the running check to finish");
    }
    scheduler.wait_idle().await;
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn channel_command(store: &Store, action: ChannelCommand) -> Result<()> {
    match action {
        ChannelCommand::Add { channel_id, name } => {
            let channel = store.add_channel(channel_id.trim(), name.trim()).await?;
            println!("added {} ({})", channel.name, channel.channel_id);
        }
        ChannelCommand::List => {
            for channel in store.list_channels().await? {
                println!("{}\t{}", channel.channel_id, channel.name);
            }
        }
        ChannelCommand::Remove { channel_id } => {
            store.remove_channel(channel_id.trim()).await?;
            println!("removed {channel_id}");
        }
    }
    Ok(())
}

async fn video_command(store: &Store, engine: &Engine, action: VideoCommand) -> Result<()> {
    match action {
        VideoCommand::List { limit } => {
            for listing in store.list_videos(limit).await? {
                let requested = listing
                    .video
                    .download_requested_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    listing.video.video_id,
                    listing.video.published_at.to_rfc3339(),
                    listing.channel_name,
                    requested,
                    listing.video.title
                );
            }
        }
        VideoCommand::Download { video_id } => {
            let at = engine.redispatch(&video_id).await?;
            println!("download requested for {video_id} at {}", at.to_rfc3339());
        }
    }
    Ok(())
}

async fn settings_command(store: &Store, action: SettingsCommand) -> Result<()> {
    match action {
        SettingsCommand::Show => print_json(&store.load_settings().await?),
        SettingsCommand::Set {
            backend,
            metube_url,
            aria2_host,
            aria2_port,
            download_folder,
            username,
            password,
            filter_shorts,
        } => {
            let mut settings = store.load_settings().await?;
            if let Some(backend) = backend {
                settings.backend = backend;
            }
            if let Some(url) = metube_url {
                settings.metube_url = url;
            }
            if let Some(host) = aria2_host {
                settings.aria2_host = host;
            }
            if let Some(port) = aria2_port {
                settings.aria2_port = port;
            }
            if let Some(folder) = download_folder {
                settings.download_folder = folder;
            }
            if let Some(username) = username {
                settings.username = username;
            }
            if let Some(password) = password {
                settings.password = password;
            }
            if let Some(filter) = filter_shorts {
                settings.filter_shorts = filter;
            }
            print_json(&store.update_settings(&settings).await?)
        }
    }
}

async fn doctor(engine: &Engine, resolver: &YtDlpResolver) -> Result<()> {
    let mut healthy = true;
    let program = resolver.program().display();
    match resolver.version().await {
        Ok(version) => println!("resolver {program}: ok (yt-dlp {version})"),
        Err(err) => {
            healthy = false;
            println!("resolver {program}: FAILED ({err})");
        }
    }
    match engine.probe_backend().await {
        Ok((name, description)) => println!("backend {name}: ok ({description})"),
        Err(err) => {
            healthy = false;
            println!("backend: FAILED ({err})");
        }
    }
    if !healthy {
        bail!("one or more checks failed");
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
