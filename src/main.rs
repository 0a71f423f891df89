use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceline::dispatch::SpoolDispatcher;
use faceline::models::SharedPipeline;
use faceline::store::LocalStore;
use faceline::{config, FaceIdentifier, FrameExtractor, Response};
use faceline_vision::FfmpegDecoder;
use log::{error, info, warn};

#[derive(Parser)]
#[command(name = "faceline")]
#[command(version, about = "Video frame extraction and face identification pipeline")]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the frame extraction stage on an object-created event
    Extract {
        /// Event JSON file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        event: String,
    },
    /// Run the face identification stage on a frame message
    Identify {
        /// Event JSON file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        event: String,
    },
    /// Identify every frame message waiting in the spool
    Drain,
    /// Validate the config and the reference database
    Check,
    /// Open config file in editor, writing defaults first if it is missing
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    cfg.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Extract { event } => extract(&cfg, &event),
        Commands::Identify { event } => identify(&cfg, &event),
        Commands::Drain => drain(&cfg),
        Commands::Check => check(&cfg),
        Commands::Config => open_config(&cfg, cli.config.as_deref()),
    }
}

fn read_event(source: &str) -> Result<serde_json::Value> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading event {}", source))?
    };
    serde_json::from_str(&raw).context("event is not valid JSON")
}

fn emit(response: &Response) -> Result<()> {
    println!("{}", serde_json::to_string(response)?);
    if !response.is_success() {
        anyhow::bail!("stage failed: {}", response.body);
    }
    Ok(())
}

fn identifier(cfg: &config::Config) -> FaceIdentifier<LocalStore, SharedPipeline> {
    FaceIdentifier::new(
        LocalStore::new(&cfg.store_root),
        SharedPipeline::from_config(cfg),
        cfg.clone(),
    )
}

fn extract(cfg: &config::Config, source: &str) -> Result<()> {
    let event = read_event(source)?;
    let extractor = FrameExtractor::new(
        LocalStore::new(&cfg.store_root),
        SpoolDispatcher::new(&cfg.spool_dir),
        FfmpegDecoder::new(&cfg.decoder.path, cfg.decoder.timeout()),
        cfg.clone(),
    );
    emit(&extractor.handle(&event))
}

fn identify(cfg: &config::Config, source: &str) -> Result<()> {
    let event = read_event(source)?;
    emit(&identifier(cfg).handle(&event))
}

fn drain(cfg: &config::Config) -> Result<()> {
    let spool = SpoolDispatcher::new(&cfg.spool_dir);
    let pending = spool.pending().context("listing spool")?;
    info!("{} message(s) pending in {}", pending.len(), spool.dir().display());

    let mut stage = identifier(cfg);
    let mut failed = 0usize;
    for entry in &pending {
        let payload = serde_json::to_value(&entry.message)?;
        let response = stage.handle(&payload);
        println!("{}", serde_json::to_string(&response)?);

        if response.is_success() {
            spool.complete(entry).context("removing handled message")?;
        } else {
            failed += 1;
            let parked = spool.fail(entry).context("parking failed message")?;
            warn!("parked {} as {}", entry.message.key, parked.display());
        }
    }

    if failed > 0 {
        error!("{} of {} message(s) failed", failed, pending.len());
        anyhow::bail!("{} message(s) failed", failed);
    }
    Ok(())
}

fn check(cfg: &config::Config) -> Result<()> {
    let db = identifier(cfg)
        .load_reference()
        .context("loading reference database")?;
    if db.is_empty() {
        anyhow::bail!(
            "reference database {}/{} is empty",
            cfg.data_container,
            cfg.reference_key
        );
    }
    info!(
        "✓ {} reference embedding(s), dimension {}",
        db.len(),
        db.dimension().unwrap_or_default()
    );
    for model in [&cfg.detector.model, &cfg.encoder.model] {
        if !model.is_file() {
            warn!("model file missing: {}", model.display());
        }
    }
    Ok(())
}

fn open_config(cfg: &config::Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&config::CONFIG_PATH);
    if !path.exists() {
        config::save_config(cfg, Some(path))
            .with_context(|| format!("writing default config to {}", path.display()))?;
        info!("Wrote default config to {}", path.display());
    }
    let config_path = path.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
