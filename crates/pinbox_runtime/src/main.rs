//! Pinbox Runtime
//!
//! Loads a compiled module, starts a session for it and either opens the
//! player window or runs one request headless.

mod app;
mod headless;
mod layout;

use anyhow::{Context, Result};
use clap::Parser;
use pinbox_core::time;
use pinbox_host::ContextConfig;
use pinbox_services::Settings;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "pinbox", version, about = "Run a sandboxed module in the pinbox player")]
struct Cli {
    /// Compiled module (.wasm or .wat)
    module: PathBuf,

    /// Program source to run once the module is ready
    #[arg(long, conflicts_with = "blob")]
    source: Option<PathBuf>,

    /// Pre-compiled program blob to run once the module is ready
    #[arg(long)]
    blob: Option<PathBuf>,

    /// Compile the source and write the exported blob here instead of running it
    #[arg(long, requires = "source")]
    export: Option<PathBuf>,

    /// Settings file (JSON)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Run without a window; exits when the request finishes
    #[arg(long)]
    headless: bool,
}

/// What to do once the module is ready.
#[derive(Debug, Clone)]
pub enum Program {
    Source(String),
    Blob(Vec<u8>),
}

fn read(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {what} {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    tracing::info!("Pinbox v{}", pinbox_core::VERSION);

    let settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let module = read(&cli.module, "module")?;
    let program = match (&cli.source, &cli.blob) {
        (Some(path), _) => Some(Program::Source(
            String::from_utf8(read(path, "source")?)
                .with_context(|| format!("source {} is not UTF-8", path.display()))?,
        )),
        (None, Some(path)) => Some(Program::Blob(read(path, "blob")?)),
        (None, None) => None,
    };

    let config = ContextConfig {
        watchdog: settings.runtime.watchdog(),
        animation_frame_interval: time::tick_interval(settings.runtime.animation_frame_hz),
    };

    if cli.headless || cli.export.is_some() {
        headless::run(module, config, program, cli.export.as_deref())
    } else {
        app::run(module, config, program, settings)
    }
}
