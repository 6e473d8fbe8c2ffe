//! Service Bootstrap and Initialization
//!
//! Command line, logging setup and the `--validate` report.

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::Parser;
use common::config_loader::get_string_config;
use common::LoggingOptions;
use cpcoe_link::{plan_register_map, DeviceDescriptor, Parity};
use errors::{IoSrvError, IoSrvResult};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::IoSrvConfig;

pub const SERVICE_NAME: &str = "iosrv";
pub const DEFAULT_CONFIG_PATH: &str = "config/iosrv.yaml";
pub const ENV_LOG_LEVEL: &str = "IOSRV_LOG_LEVEL";

/// Command-line arguments for iosrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "iosrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "CPCOE I/O expansion polling service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short = 'c', long, env = "IOSRV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level or filter (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Enable debug mode (same as --log-level debug)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Log as JSON objects
    #[arg(long)]
    pub json_logs: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - check the configuration, print the register plan and exit
    #[arg(long)]
    pub validate: bool,

    /// Print every reading to stdout as a JSON line
    #[arg(long)]
    pub json_readings: bool,
}

impl Args {
    /// Logging options with priority CLI > ENV > config file
    pub fn logging_options(&self, config: &IoSrvConfig) -> LoggingOptions {
        let cli_level = if self.debug {
            Some("debug".to_string())
        } else {
            self.log_level.clone()
        };

        LoggingOptions {
            service_name: SERVICE_NAME.to_string(),
            level: get_string_config(cli_level, ENV_LOG_LEVEL, config.logging.level.clone()),
            json: self.json_logs || config.logging.json,
            ansi: !self.no_color,
        }
    }
}

/// Initialize logging system
pub fn initialize_logging(args: &Args, config: &IoSrvConfig) -> IoSrvResult<()> {
    common::init_logging(&args.logging_options(config))
        .map_err(|e| IoSrvError::Configuration(format!("Failed to init logging: {}", e)))
}

/// Wait for the signal listener task; a failed listener is logged, not fatal
pub async fn join_signal_listener(listener: JoinHandle<()>) {
    if let Err(e) = listener.await {
        warn!("Signal listener failed: {}", e);
    }
}

fn parity_letter(parity: Parity) -> char {
    match parity {
        Parity::None => 'N',
        Parity::Even => 'E',
        Parity::Odd => 'O',
    }
}

/// Human-readable summary of a device and the reads it will issue
pub fn describe_plan(descriptor: &DeviceDescriptor) -> String {
    let serial = descriptor.serial();
    let plan = plan_register_map(descriptor);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: slave {} on {} {} {}{}{}, timeout {}ms, {} reads",
        descriptor.name(),
        descriptor.bus_address(),
        serial.port,
        serial.baud_rate,
        serial.data_bits,
        parity_letter(serial.parity),
        serial.stop_bits,
        serial.effective_read_timeout().as_millis(),
        plan.len()
    );
    for chunk in &plan {
        let kind = descriptor
            .channels()
            .get(chunk.channel_index)
            .map(|c| format!("{:?}", c.kind))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {:<16} @{}x{}  {} [{}]",
            chunk.source_tag, chunk.start_register, chunk.register_count, kind, chunk.unit
        );
    }
    if let Some(layout) = descriptor.config_block() {
        let _ = writeln!(
            out,
            "  {:<16} @{}x{}  channel config check",
            "UnivChs",
            layout.base,
            layout.register_count()
        );
    }
    if let Some(block) = descriptor.error_block() {
        let _ = writeln!(
            out,
            "  {:<16} @{}x{}  error registers",
            "IoErrors", block.start, block.count
        );
    }
    out
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use cpcoe_link::{
        ConfigBlockLayout, ErrorBlock, InputChannelType, OutputChannelType, SerialParams,
        WiringEntry,
    };
    use tracing_test::traced_test;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["iosrv"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(args.log_level.is_none());
        assert!(!args.validate);
        assert!(!args.json_readings);
    }

    #[test]
    fn test_args_flags() {
        let args = Args::try_parse_from([
            "iosrv",
            "-c",
            "/etc/iosrv/site.toml",
            "--log-level",
            "warn",
            "--no-color",
            "--json-readings",
            "--validate",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/iosrv/site.toml"));
        assert!(args.validate);

        let options = args.logging_options(&IoSrvConfig::default());
        assert_eq!(options.level, "warn");
        assert!(!options.ansi);
        assert!(!options.json);
    }

    #[test]
    fn test_debug_flag_wins_over_config() {
        let args = Args::try_parse_from(["iosrv", "-d", "--json-logs"]).unwrap();
        let mut config = IoSrvConfig::default();
        config.logging.level = "error".to_string();

        let options = args.logging_options(&config);
        assert_eq!(options.level, "debug");
        assert!(options.json);
    }

    #[test]
    fn test_describe_plan() {
        let mut serial = SerialParams::new("/dev/ttyUSB0");
        serial.parity = Parity::Even;
        let mut wiring: Vec<WiringEntry> = (0..10).map(WiringEntry::unused).collect();
        wiring[0] = WiringEntry::input(0, InputChannelType::Pt1000);
        wiring[4] = WiringEntry::output(4, OutputChannelType::PwmHighFreq);
        let descriptor = DeviceDescriptor::new("boiler", 2, serial, &wiring).unwrap();

        let text = describe_plan(&descriptor);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("boiler: slave 2 on /dev/ttyUSB0 19200 8E1"));
        assert!(lines[0].ends_with("2 reads"));
        assert!(lines[1].contains("UnivChsVals[0]"));
        assert!(lines[1].contains("@49x2"));
        assert!(lines[2].contains("@57x1"));
        assert!(lines[2].contains("PwmHighFreq"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_signal_listener_is_logged() {
        let listener: JoinHandle<()> = tokio::spawn(async { panic!("listener crashed") });
        join_signal_listener(listener).await;
        assert!(logs_contain("Signal listener failed"));

        join_signal_listener(tokio::spawn(async {})).await;
    }

    #[test]
    fn test_describe_plan_lists_module_blocks() {
        let wiring: Vec<WiringEntry> = (0..10).map(WiringEntry::unused).collect();
        let descriptor = DeviceDescriptor::new("ahu", 4, SerialParams::new("COM3"), &wiring)
            .unwrap()
            .with_config_block(ConfigBlockLayout { base: 1, stride: 12 })
            .unwrap()
            .with_error_block(ErrorBlock {
                start: 200,
                count: 10,
            })
            .unwrap();

        let text = describe_plan(&descriptor);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("0 reads"));
        assert!(lines[1].contains("UnivChs"));
        assert!(lines[1].contains("@1x110"));
        assert!(lines[2].contains("@200x10  error registers"));
    }
}
