//! Blocking helpers for the external tools the kiosk drives.

use std::process::Command;

use anyhow::{Context, Result, bail};

const STDERR_SNIPPET: usize = 300;

/// Run `program` with `args` and return its stdout.
///
/// A non-zero exit status is an error carrying the start of stderr.
pub fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("spawn {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let snippet: String = stderr.trim().chars().take(STDERR_SNIPPET).collect();
        if snippet.is_empty() {
            bail!("{program} exited with {}", output.status);
        }
        bail!("{program} exited with {}: {snippet}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
