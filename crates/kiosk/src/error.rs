//! Error taxonomy shared by the kiosk core and its collaborators.

use thiserror::Error;

/// Failures the core knows how to react to.
///
/// End of media is not an error: it arrives as
/// [`PipelineEvent::EndOfStream`](crate::pipeline::PipelineEvent::EndOfStream).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KioskError {
    /// A pipeline could not be constructed; the disc session is aborted.
    #[error("pipeline build failed: {0}")]
    BuildFailed(String),
    /// Audio capture failed; the recognition loop retries next iteration.
    #[error("audio capture failed: {0}")]
    CaptureFailed(String),
    /// Metadata or recognition lookup produced nothing usable.
    #[error("lookup failed: {0}")]
    LookupFailed(String),
    /// An external helper (receiver daemon, bluetoothctl, modprobe) failed.
    #[error("external process unavailable: {0}")]
    ExternalProcessUnavailable(String),
    /// The disc table of contents could not be read.
    #[error("disc unavailable: {0}")]
    DiscUnavailable(String),
}

impl KioskError {
    /// Wrap an `anyhow` chain, keeping every context layer in the message.
    pub fn build_failed(err: &anyhow::Error) -> Self {
        Self::BuildFailed(format!("{err:#}"))
    }

    pub fn capture_failed(err: &anyhow::Error) -> Self {
        Self::CaptureFailed(format!("{err:#}"))
    }

    pub fn lookup_failed(err: &anyhow::Error) -> Self {
        Self::LookupFailed(format!("{err:#}"))
    }

    pub fn external(err: &anyhow::Error) -> Self {
        Self::ExternalProcessUnavailable(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn wrappers_keep_context_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("no such device"))
            .context("open /dev/sr0")
            .unwrap_err();
        let wrapped = KioskError::build_failed(&err);
        assert_eq!(
            wrapped.to_string(),
            "pipeline build failed: open /dev/sr0: no such device"
        );
    }
}
