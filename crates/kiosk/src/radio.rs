//! Bluetooth radio power and the ALSA loopback module used to capture the sink.

use std::fs;

use anyhow::Context;

use crate::command;
use crate::error::KioskError;

const LOOPBACK_MODULE: &str = "snd_aloop";

pub trait RadioControl: Send + Sync {
    fn power(&self, on: bool) -> Result<(), KioskError>;
    /// Make sure the loopback capture device exists.
    fn ensure_loopback(&self) -> Result<(), KioskError>;
}

/// Drives `bluetoothctl` and `modprobe`.
pub struct BluetoothctlRadio;

impl RadioControl for BluetoothctlRadio {
    fn power(&self, on: bool) -> Result<(), KioskError> {
        let state = if on { "on" } else { "off" };
        command::run("bluetoothctl", &["power", state])
            .with_context(|| format!("bluetooth power {state}"))
            .map_err(|e| KioskError::external(&e))?;
        tracing::info!(state, "bluetooth power");
        Ok(())
    }

    fn ensure_loopback(&self) -> Result<(), KioskError> {
        match fs::read_to_string("/proc/modules") {
            Ok(modules) if module_loaded(&modules, LOOPBACK_MODULE) => return Ok(()),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "cannot read /proc/modules; loading anyway"),
        }
        command::run("modprobe", &["snd-aloop"]).map_err(|e| KioskError::external(&e))?;
        tracing::info!(module = LOOPBACK_MODULE, "loopback module loaded");
        Ok(())
    }
}

fn module_loaded(proc_modules: &str, name: &str) -> bool {
    proc_modules
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|module| module == name)
}
