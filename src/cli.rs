use crate::{
    install_prometheus_recorder, read_url_list, serve, AppState, BatchRunner, CaptureCoordinator,
    CaptureError, Config, EnrichmentStatus, HealthChecker, ProgressTracker,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "page-capture")]
#[command(about = "Page capture backend with pooled headless Chrome workers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Number of pre-launched render workers")]
    pub pool_size: Option<usize>,

    #[arg(long, global = true, help = "Maximum concurrent captures")]
    pub max_concurrent: Option<usize>,

    #[arg(long, global = true, help = "Capture timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, help = "OCR program run against every fresh capture")]
    pub ocr_command: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP capture service
    Serve {
        #[arg(short, long, help = "Server port")]
        port: Option<u16>,

        #[arg(long, help = "Bind address")]
        bind: Option<String>,

        #[arg(long, help = "Expose Prometheus metrics on /metrics")]
        metrics: bool,

        #[arg(long, help = "Health log interval in seconds")]
        health_interval: Option<u64>,
    },

    /// Capture a single URL to a PNG file
    Capture {
        #[arg(short, long, help = "URL to capture")]
        url: String,

        #[arg(short, long, help = "Output file path")]
        output: PathBuf,

        #[arg(long, help = "Wait for text extraction and print the result")]
        wait_enrichment: bool,
    },

    /// Capture every URL listed in a file
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(short, long, help = "Output directory for captures")]
        output: PathBuf,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,
    },

    /// Validate a configuration file
    Validate {
        #[arg(help = "Configuration file to validate")]
        file: PathBuf,
    },

    /// Start the pool and print its health
    Health,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent = max_concurrent;
        }
        if let Some(timeout) = self.timeout {
            config.capture_timeout = Duration::from_secs(timeout);
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Some(command) = &self.ocr_command {
            config.enrichment.command = Some(command.clone());
        }
    }
}

pub struct CliRunner {
    pub config: Config,
    pub coordinator: CaptureCoordinator,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        let coordinator = CaptureCoordinator::with_chrome(config.clone());
        Self {
            config,
            coordinator,
        }
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Serve {
                port,
                bind,
                metrics,
                health_interval,
            } => self.run_server(port, bind, metrics, health_interval).await,
            Commands::Capture {
                url,
                output,
                wait_enrichment,
            } => self.run_capture(url, output, wait_enrichment).await,
            Commands::Batch {
                input,
                output,
                progress_interval,
            } => self.run_batch(input, output, progress_interval).await,
            Commands::Validate { file } => validate_config_file(file).await,
            Commands::Health => self.show_health().await,
        }
    }

    pub async fn run_server(
        &self,
        port: Option<u16>,
        bind: Option<String>,
        metrics: bool,
        health_interval: Option<u64>,
    ) -> anyhow::Result<()> {
        let prometheus = if metrics {
            Some(install_prometheus_recorder()?)
        } else {
            None
        };

        self.coordinator.start().await?;

        if let Some(secs) = health_interval {
            let coordinator = self.coordinator.clone();
            tokio::spawn(async move {
                HealthChecker::default()
                    .run_periodic(coordinator, Duration::from_secs(secs))
                    .await;
            });
        }

        let addr = format!(
            "{}:{}",
            bind.as_deref().unwrap_or(&self.config.server.bind),
            port.unwrap_or(self.config.server.port)
        );
        serve(AppState::new(self.coordinator.clone(), prometheus), &addr).await?;
        Ok(())
    }

    pub async fn run_capture(
        &self,
        url: String,
        output: PathBuf,
        wait_enrichment: bool,
    ) -> anyhow::Result<()> {
        info!("Capturing: {}", url);
        self.coordinator.start().await?;

        let artifact = self.coordinator.capture(&url).await?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&output, &artifact.data).await?;

        println!("Capture saved:");
        println!("  URL: {}", artifact.url);
        println!("  Output: {}", output.display());
        println!("  Size: {}", crate::format_bytes(artifact.size()));
        println!("  Render time: {}", crate::format_duration(artifact.render_time));
        if let Some(title) = &artifact.title {
            println!("  Title: {title}");
        }

        if wait_enrichment {
            match self.wait_for_enrichment(&url).await {
                Some(text) => println!("  Text:\n{text}"),
                None => warn!("No text was extracted for {}", url),
            }
        }

        Ok(())
    }

    async fn wait_for_enrichment(&self, url: &str) -> Option<String> {
        let deadline = tokio::time::Instant::now() + self.config.enrichment.timeout;

        loop {
            match self.coordinator.get_enrichment(url) {
                EnrichmentStatus::Ready(enrichment) => return Some(enrichment.text),
                EnrichmentStatus::Absent | EnrichmentStatus::Pending
                    if tokio::time::Instant::now() < deadline =>
                {
                    tokio::time::sleep(Duration::from_millis(250)).await
                }
                _ => return None,
            }
        }
    }

    pub async fn run_batch(
        &self,
        input: PathBuf,
        output: PathBuf,
        progress_interval: Option<u64>,
    ) -> anyhow::Result<()> {
        let urls = read_url_list(&input).await?;
        info!("Loaded {} URLs from {}", urls.len(), input.display());

        self.coordinator.start().await?;

        let progress = Arc::new(ProgressTracker::new(urls.len()));
        if let Some(secs) = progress_interval {
            let tracker = progress.clone();
            tokio::spawn(async move { tracker.report_every(Duration::from_secs(secs)).await });
        }

        let runner = BatchRunner::new(self.coordinator.clone(), output);
        let items = runner.run(urls, progress.clone()).await?;

        let info = progress.get_progress();
        println!(
            "Batch finished: {} succeeded, {} failed in {}",
            info.success,
            info.errors,
            crate::format_duration(info.elapsed)
        );
        for item in items.iter().filter(|item| item.result.is_err()) {
            if let Err(e) = &item.result {
                println!("  {}: {}", item.url, e);
            }
        }
        Ok(())
    }

    pub async fn show_health(&self) -> anyhow::Result<()> {
        self.coordinator.start().await?;
        let report = HealthChecker::default().check(&self.coordinator);

        println!("System Health Check");
        println!("===================");
        println!("Status: {:?}", report.status);
        println!("Render workers:");
        println!("  Total: {}", report.pool.total);
        println!("  Available: {}", report.pool.available);
        println!("  In use: {}", report.pool.in_use);
        println!("  Overflow in use: {}", report.pool.overflow_in_use);
        println!("Admission queue:");
        println!("  Queued: {}", report.queue.queued);
        println!("  Running: {}/{}", report.queue.running, report.queue.max_concurrent);
        Ok(())
    }
}

async fn validate_config_file(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());

    let config = Config::from_file(&path).await?;
    config.validate()?;

    println!("Configuration is valid:");
    println!("  Pool size: {}", config.pool_size);
    println!("  Max concurrent: {}", config.max_concurrent);
    println!("  Capture timeout: {:?}", config.capture_timeout);
    println!("  Cache TTL: {:?}", config.cache_ttl);
    println!(
        "  Viewport: {}x{}",
        config.viewport.width, config.viewport.height
    );
    match &config.enrichment.command {
        Some(command) => println!("  OCR command: {command}"),
        None => println!("  OCR command: none"),
    }

    Ok(())
}

/// Load the configuration file if one is given, then apply CLI overrides
pub async fn load_config(args: &Cli) -> Result<Config, CaptureError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    args.apply_overrides(&mut config);
    config.validate()?;

    info!(
        "Configuration loaded: pool size {}, max concurrent {}, timeout {:?}",
        config.pool_size, config.max_concurrent, config.capture_timeout
    );
    Ok(config)
}

pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}
