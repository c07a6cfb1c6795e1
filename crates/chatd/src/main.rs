use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chat_core::config::{Identity, chat_history_db_path, load_settings, resolve_download_dirs, settings_path};
use chat_core::{ChatNode, ChatNodeOptions};
use clap::{Parser, ValueEnum};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// LAN chat node: UDP peer discovery, TCP messaging, group chat and file
/// transfer over a local network.
#[derive(Debug, Parser)]
#[command(name = "chatd", version)]
struct Opts {
    /// TCP port to listen on. 0 = auto-assigned. Invalid values fall back
    /// to 0.
    #[arg(long, default_value_t = 0, value_parser = parse_tcp_port)]
    tcp_port: u16,

    /// UDP discovery port.
    #[arg(long, default_value_t = chat_core::discovery::DEFAULT_DISCOVERY_PORT)]
    discovery_port: u16,

    /// Disable self-origination filtering, for running two local nodes on
    /// the same host during development.
    #[arg(long)]
    loopback_discovery: bool,

    /// Directory incoming files are written to.
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Display name announced to peers.
    #[arg(long)]
    user_name: Option<String>,

    #[arg(short = 'v', long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Auto-accept incoming images without prompting.
    #[arg(long, default_value_t = true)]
    auto_accept_images: bool,

    /// Auto-accept incoming non-image files without prompting.
    #[arg(long, default_value_t = false)]
    auto_accept_files: bool,
}

/// Falls back to 0 (auto) for anything out of `u16` range, per spec's
/// process-flags fallback rule, instead of clap's default hard error.
fn parse_tcp_port(raw: &str) -> Result<u16, std::convert::Infallible> {
    Ok(raw.parse().unwrap_or(0))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    chat_core::logging::init_logging(opts.log_level.as_str(), opts.log_file.as_deref())
        .context("failed to initialize logging")?;

    let settings_path = settings_path();
    let settings = settings_path
        .as_deref()
        .map(load_settings)
        .unwrap_or_default();

    let preferred_download_dir = opts.download_dir.or(settings.paths.download_directory.clone());
    let download_dirs = resolve_download_dirs(preferred_download_dir);
    let user_name = opts
        .user_name
        .or(settings.user.user_name)
        .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned());

    let identity = Identity {
        local_user_id: uuid::Uuid::new_v4().to_string(),
        user_name,
    };

    let chat_history_db = settings
        .paths
        .chat_history_directory
        .map(|dir| dir.join("chat_history.db"))
        .or_else(chat_history_db_path)
        .unwrap_or_else(|| PathBuf::from("chat_history.db"));

    let node = ChatNode::start(ChatNodeOptions {
        identity,
        download_dirs,
        tcp_port: opts.tcp_port,
        discovery_port: opts.discovery_port,
        loopback_discovery: opts.loopback_discovery,
        chat_history_db,
        auto_accept_images: opts.auto_accept_images,
        auto_accept_files: opts.auto_accept_files,
        image_classifier: None,
        text_embedder: None,
        nsfw_block_incoming: settings.nsfw.block_incoming,
        nsfw_threshold: settings.nsfw.threshold,
    })
    .await
    .context("failed to start chat node")?;

    info!(
        user_id = %node.identity.local_user_id,
        tcp_port = node.local_tcp_port(),
        "listening"
    );

    log_events(node.clone());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.shutdown().await;
    Ok(())
}

fn log_events(node: Arc<ChatNode>) {
    let mut rx = node.events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            info!(?event, "event");
        }
    });
}
