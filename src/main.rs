use clap::Parser;
use episode_courier::{
    ConsoleSink, CourierConfig, JobRunner, NotificationSink, QualityOrchestrator, SourceMode,
    handle_message,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Download an anime episode (or a whole series) in several qualities
#[derive(Parser, Debug)]
#[command(name = "episode-courier", version, about)]
struct Cli {
    /// Series link or id, e.g. https://animepahe.ru/anime/<id>
    series: String,

    /// 1-based episode number; omit to download the whole series
    episode: Option<String>,

    /// Quality tier to download (repeatable); defaults to 360, 720 and 1080
    #[arg(short, long = "quality", value_name = "P")]
    qualities: Vec<u32>,

    /// Root directory for job staging directories
    #[arg(long, env = "COURIER_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// Resolver program (animepahe-cli compatible)
    #[arg(long, env = "COURIER_RESOLVER")]
    resolver: Option<String>,

    /// Accelerated fetch program (aria2c compatible)
    #[arg(long, env = "COURIER_FETCHER")]
    fetcher: Option<String>,

    /// Whether the resolver prints a URL or downloads the file itself
    #[arg(long, env = "COURIER_SOURCE_MODE", value_enum)]
    mode: Option<SourceMode>,

    /// Parallel connections for the fetch program (1-16)
    #[arg(long, env = "COURIER_CONNECTIONS")]
    connections: Option<u8>,

    /// Minimum percentage step between progress updates
    #[arg(long, env = "COURIER_PROGRESS_STEP")]
    progress_step: Option<u8>,

    /// Seconds to wait for a downloaded file to appear
    #[arg(long, env = "COURIER_ARTIFACT_WAIT")]
    artifact_wait: Option<u64>,

    /// Seconds after which a resolver or fetch run is killed
    #[arg(long, env = "COURIER_TIMEOUT")]
    timeout: Option<u64>,

    /// Base URL of the AnimePahe catalog
    #[arg(long, env = "COURIER_CATALOG_URL")]
    catalog_url: Option<String>,

    /// Catalog cache lifetime in seconds (0 disables the cache)
    #[arg(long, env = "COURIER_CACHE_TTL")]
    cache_ttl: Option<u64>,

    /// Directory receiving per-quality tool logs
    #[arg(long, env = "COURIER_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl Cli {
    /// Request text in the `<series> [episode]` form
    fn request_text(&self) -> String {
        match &self.episode {
            Some(episode) => format!("{} {}", self.series, episode),
            None => self.series.clone(),
        }
    }

    /// Applies the given arguments over the default configuration
    fn into_config(self) -> CourierConfig {
        let mut config = CourierConfig::default();

        if let Some(dir) = self.download_dir {
            config.download_root = dir;
        }
        if let Some(resolver) = self.resolver {
            config.resolver_program = resolver;
        }
        if let Some(fetcher) = self.fetcher {
            config.fetcher_program = fetcher;
        }
        if let Some(mode) = self.mode {
            config.source_mode = mode;
        }
        if let Some(connections) = self.connections {
            config.fetch_connections = connections;
        }
        if let Some(step) = self.progress_step {
            config.progress_threshold = step;
        }
        if let Some(secs) = self.artifact_wait {
            config.artifact_wait = Duration::from_secs(secs);
        }
        if let Some(url) = self.catalog_url {
            config.catalog_base_url = url;
        }
        if let Some(secs) = self.cache_ttl {
            config.catalog_cache_ttl = Duration::from_secs(secs);
        }
        if !self.qualities.is_empty() {
            config.default_qualities = self.qualities;
        }
        config.process_timeout = self.timeout.map(Duration::from_secs);
        config.log_dir = self.log_dir;

        config
    }
}

fn init_tracing() {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let text = cli.request_text();
    let config = cli.into_config();

    if let Some(log_dir) = &config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("Error: Cannot create log directory {}: {}", log_dir.display(), e);
            process::exit(1);
        }
    }

    let runner = JobRunner::new(QualityOrchestrator::from_config(&config));
    let sink: Arc<dyn NotificationSink> = Arc::new(ConsoleSink::stdout());

    let handle = match handle_message(&runner, &text, &config.default_qualities, sink) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match handle.join() {
        Ok(job) => {
            let summary = job.summary();
            if summary.delivered == 0 {
                process::exit(1);
            }
            println!(
                "\nArtifacts are in {}",
                episode_courier::job_directory(&config.download_root, job.id).display()
            );
        }
        Err(_) => {
            eprintln!("Error: The download job crashed");
            process::exit(1);
        }
    }
}
