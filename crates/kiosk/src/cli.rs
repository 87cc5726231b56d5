use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use kiosk_types::Source;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "kiosk", version = VERSION)]
pub struct Args {
    /// Path to a TOML config file (default: kiosk.toml next to the executable)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// HTTP API bind address, e.g. 0.0.0.0:5580 (overrides the config file)
    #[arg(long)]
    pub http_bind: Option<SocketAddr>,

    /// Source to select at startup: disc, receiver or bluetooth
    #[arg(long)]
    pub source: Option<Source>,

    /// List audio devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::parse_from([
            "kiosk",
            "--config",
            "/etc/kiosk.toml",
            "--http-bind",
            "127.0.0.1:8080",
            "--source",
            "cd",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/kiosk.toml")));
        assert_eq!(args.http_bind.map(|b| b.port()), Some(8080));
        assert_eq!(args.source, Some(Source::Disc));
        assert!(!args.list_devices);
    }

    #[test]
    fn rejects_unknown_source() {
        assert!(Args::try_parse_from(["kiosk", "--source", "tape"]).is_err());
    }
}
