//! docpack CLI: prep / fetch / build / all.

use clap::{Args, Parser, Subcommand};
use docpack::{ArchiveConfig, ArchiveError, ArchivePipeline};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Archive a documentation site into combined offline documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the URL set and navigation tree, writing prep.json.
    Prep(CommonArgs),
    /// Fetch every page from prep.json, writing fetch.json and artifacts.
    Fetch(CommonArgs),
    /// Assemble combined documents from fetch.json.
    Build(CommonArgs),
    /// Run prep, fetch, and build in sequence.
    All(CommonArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Sitemap entry point, e.g. https://docs.example.com/sitemap.xml
    #[arg(short, long)]
    entry_url: String,

    /// Page carrying the navigation tree (defaults to the first discovered URL)
    #[arg(short, long)]
    nav_url: Option<String>,

    /// Output directory for checkpoints and artifacts
    #[arg(short, long, default_value = "./archive")]
    output_dir: PathBuf,

    /// Maximum concurrent page fetches
    #[arg(short = 'c', long, default_value_t = 4)]
    max_concurrency: usize,

    /// Retries per URL after the first failed attempt
    #[arg(short = 'r', long, default_value_t = 3)]
    max_retries: usize,

    /// Timeout in seconds for every navigation/wait
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Test mode: cap the URL set to this many entries
    #[arg(long)]
    test_limit: Option<usize>,

    /// Pause in milliseconds before each network attempt
    #[arg(long)]
    pause_ms: Option<u64>,

    /// Coverage fraction below which the navigation tree is considered
    /// unrepresentative of the fetched set
    #[arg(long, default_value_t = 0.5)]
    nav_coverage_threshold: f64,

    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,

    /// Override the content selector candidates with one selector
    #[arg(long)]
    content_selector: Option<String>,
}

impl CommonArgs {
    fn into_config(self) -> anyhow::Result<ArchiveConfig> {
        let mut builder = ArchiveConfig::builder()
            .entry_url(self.entry_url)
            .output_dir(self.output_dir)
            .max_concurrency(self.max_concurrency)
            .max_retries(self.max_retries)
            .timeout_secs(self.timeout)
            .nav_coverage_threshold(self.nav_coverage_threshold)
            .headless(!self.headed);
        if let Some(nav_url) = self.nav_url {
            builder = builder.nav_url(nav_url);
        }
        if let Some(limit) = self.test_limit {
            builder = builder.test_limit(limit);
        }
        if let Some(pause) = self.pause_ms {
            builder = builder.request_pause_ms(pause);
        }
        if let Some(selector) = self.content_selector {
            builder = builder.content_selector(selector);
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = run(cli.command).await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            // Fatal failures (nothing discovered, checkpoint unwritable)
            // exit 2; anything else that still bubbled up exits 1.
            if e.is_fatal() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(command: Command) -> Result<(), ArchiveError> {
    match command {
        Command::Prep(args) => {
            let pipeline = ArchivePipeline::new(args.into_config()?);
            pipeline.prep().await?;
            Ok(())
        }
        Command::Fetch(args) => {
            let pipeline = ArchivePipeline::new(args.into_config()?);
            pipeline.fetch().await?;
            Ok(())
        }
        Command::Build(args) => {
            let pipeline = ArchivePipeline::new(args.into_config()?);
            pipeline.build().await
        }
        Command::All(args) => {
            let pipeline = ArchivePipeline::new(args.into_config()?);
            pipeline.all().await
        }
    }
}
