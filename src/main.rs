//! CLI entry point for `attach-proxy`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use attach_proxy::{logging, proxy, ProxyConfig};
use chunk_dl::{ChunkClient, ChunkDownloader, DownloadOptions, ProgressCallback};

#[derive(Parser)]
#[command(name = "attach-proxy", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file
    #[arg(long, global = true, env = "ATTACH_PROXY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the caching proxy
    Serve(ServeArgs),
    /// Download one attachment through a running proxy
    Download(DownloadArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Origin API host
    #[arg(long, env = "WECHAT_API_HOST")]
    target_host: Option<String>,

    /// Origin API port
    #[arg(long, env = "WECHAT_API_PORT")]
    target_port: Option<u16>,

    #[arg(long, env = "WECHAT_API_PROXY_HOST")]
    listen_host: Option<String>,

    /// Port the proxy listens on
    #[arg(long, env = "WECHAT_API_PROXY_PORT")]
    proxy_port: Option<u16>,

    /// Largest payload the origin returns per call
    #[arg(long)]
    origin_max_payload: Option<u64>,

    /// Chunk length for requests without `Length`
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Cache TTL in seconds
    #[arg(long)]
    cache_ttl: Option<u64>,

    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(host) = self.target_host {
            config.origin_host = host;
        }
        if let Some(port) = self.target_port {
            config.origin_port = port;
        }
        if let Some(host) = self.listen_host {
            config.listen_host = host;
        }
        if let Some(port) = self.proxy_port {
            config.listen_port = port;
        }
        if let Some(max) = self.origin_max_payload {
            config.origin_max_payload = max;
        }
        if let Some(size) = self.chunk_size {
            config.default_chunk_size = size;
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache_ttl_secs = ttl;
        }
        if let Some(dir) = self.log_dir {
            config.log_dir = dir;
        }
    }
}

#[derive(Args)]
struct DownloadArgs {
    /// Proxy base URL
    #[arg(long, env = "ATTACH_PROXY_URL", default_value = "http://127.0.0.1:9001")]
    proxy: String,

    attach_id: String,

    output: PathBuf,

    #[arg(long)]
    chunk_size: Option<u64>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Account id forwarded to the origin
    #[arg(long)]
    wxid: Option<String>,

    /// Per-chunk timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ProxyConfig::load(cli.config.as_deref()).context("loading config")?;
    let level = logging::level_for(cli.verbose);

    match cli.command {
        Commands::Serve(args) => {
            args.apply(&mut config);
            let _guard = logging::init(level, Some(config.log_dir.as_path()));
            cmd_serve(config).await
        }
        Commands::Download(args) => {
            let _guard = logging::init(level, None);
            cmd_download(args, &config).await
        }
    }
}

async fn cmd_serve(config: ProxyConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received Ctrl-C, shutting down");
        }
        signal_token.cancel();
    });

    proxy::run(&config, shutdown)
        .await
        .with_context(|| format!("serving on {}", config.listen_addr()))
}

async fn cmd_download(args: DownloadArgs, config: &ProxyConfig) -> anyhow::Result<()> {
    let options = DownloadOptions {
        chunk_size: args.chunk_size.unwrap_or(config.default_chunk_size),
        max_retries: args.max_retries.unwrap_or(config.default_max_retries),
        chunk_timeout: Duration::from_secs(args.timeout),
        ..Default::default()
    };

    let mut client = ChunkClient::new(&args.proxy)?;
    if let Some(wxid) = args.wxid {
        client = client.with_wxid(wxid);
    }
    let downloader = ChunkDownloader::new(client, options);

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{bar:40}] {bytes}/{total_bytes} ({eta})")
            .context("progress template")?
            .progress_chars("=> "),
    );
    let bar = pb.clone();
    let progress: ProgressCallback = Box::new(move |written, total| {
        bar.set_length(total);
        bar.set_position(written);
    });

    let result = downloader
        .download_with_cancel(&args.attach_id, &args.output, &cancelled, Some(progress))
        .await;
    pb.finish_and_clear();

    let report = result.with_context(|| format!("downloading {}", args.attach_id))?;
    println!(
        "{} -> {} ({} bytes, {} chunks, {} retries, {:.1?})",
        report.attach_id,
        report.destination.display(),
        report.total_size,
        report.chunks,
        report.retries,
        report.elapsed
    );
    Ok(())
}
