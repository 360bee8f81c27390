//! Windowless runner
//!
//! Starts a session, issues one request and relays the module's messages
//! to the terminal until it finishes.

use crate::Program;
use anyhow::{bail, Context, Result};
use pinbox_core::RunOutcome;
use pinbox_host::{ContextConfig, Notice, Session};
use std::path::Path;

pub fn run(module: Vec<u8>, config: ContextConfig, program: Option<Program>, export: Option<&Path>) -> Result<()> {
    let mut session = Session::start(module, config).context("starting module")?;

    let accepted = match (&program, export) {
        (Some(Program::Source(source)), Some(_)) => {
            session.compile_and_export(source)?;
            true
        }
        (Some(Program::Source(source)), None) => session.run(source)?,
        (Some(Program::Blob(blob)), _) => session.run_from_blob(blob.clone())?,
        (None, _) => false,
    };
    if !accepted {
        tracing::info!("nothing to run");
        session.shutdown();
        return Ok(());
    }

    let mut failed = false;
    let mut exported = None;
    while let Some(notice) = session.wait() {
        match notice {
            Notice::Print(text) => print!("{text}"),
            Notice::Alert(text) => println!("{text}"),
            Notice::Error(details) => {
                eprintln!("{details}");
                failed = true;
            }
            Notice::State(state) => tracing::debug!(?state, "module state published"),
            Notice::Exported(bytes) => exported = Some(bytes),
            Notice::Finished(outcome) => {
                failed |= outcome == RunOutcome::Faulted;
                break;
            }
        }
    }
    if let Some(seconds) = session.time_since_start() {
        tracing::debug!(seconds, "program clock at finish");
    }
    session.shutdown();

    if let Some(path) = export {
        let bytes = exported.context("module finished without publishing an export")?;
        std::fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "export written");
    }
    if failed {
        bail!("program failed");
    }
    Ok(())
}
