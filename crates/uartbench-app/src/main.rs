mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::path::PathBuf;
use uartbench_core::{HarnessConfig, HarnessEvent, HarnessService, TextEncoding};
use uartbench_decode::{BitPeriod, Ticks};

/// Decode a simulated device's UART output and compare it to a reference.
#[derive(Parser, Debug)]
#[command(name = "uartbench", version)]
struct Cli {
    /// JSON harness config (defaults to the per-user config, if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bit period in simulation ticks
    #[arg(long)]
    bit_period: Option<Ticks>,

    /// Reference text
    #[arg(long)]
    expected: Option<String>,

    /// Reference bytes as hex, e.g. "48 69 0a"
    #[arg(long, conflicts_with = "expected")]
    expected_hex: Option<String>,

    /// Text the simulated device sends instead of the reference
    #[arg(long)]
    transmit: Option<String>,

    /// Simulated-time budget for the whole run, in ticks
    #[arg(long)]
    timeout: Option<Ticks>,

    /// Print the capture as hex bytes
    #[arg(long)]
    hex: bool,

    /// Prefix capture lines with their simulated tick
    #[arg(long)]
    timestamps: bool,

    /// Only print decoded traffic
    #[arg(long)]
    rx_only: bool,

    /// Text encoding for the capture (auto, utf-8, utf-16, ascii, gbk)
    #[arg(long, default_value = "auto")]
    encoding: TextEncoding,

    /// Store the effective config before running
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut HarnessConfig) -> Result<()> {
        if let Some(ticks) = self.bit_period {
            config.bit_period = BitPeriod::new(ticks).context("--bit-period")?;
        }
        if let Some(text) = &self.expected {
            config.expected = text.clone();
            config.expected_hex = None;
        }
        if let Some(hex) = &self.expected_hex {
            config.expected_hex = Some(hex.clone());
        }
        if let Some(text) = &self.transmit {
            config.transmit = Some(text.clone());
        }
        if let Some(ticks) = self.timeout {
            config.timeout = Some(ticks);
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = config::load(cli.config.as_deref())?;
    cli.apply(&mut config)?;

    if cli.write_config {
        let path = match cli.config.clone().or_else(config::default_path) {
            Some(path) => path,
            None => bail!("no config directory on this platform; pass --config"),
        };
        config::save(&path, &config)?;
        info!("wrote {}", path.display());
    }

    let service = HarnessService::spawn(config).context("starting harness")?;
    for event in service.events().iter() {
        match event {
            HarnessEvent::Started { frames } => info!("expecting {frames} frames"),
            HarnessEvent::Byte { index, value, at } => {
                debug!("frame {index}: {value:#04x} {:?} at tick {at}", char::from(value))
            }
            HarnessEvent::Failed(err) => warn!("{err}"),
            HarnessEvent::Finished(_) => {}
        }
    }

    let log = service.log();
    {
        let mut log = log.lock();
        log.set_filter(true, !cli.rx_only);
        print!("{}", log.to_text_with_encoding(cli.timestamps, cli.hex, cli.encoding));
    }

    match service.join() {
        Ok(report) => {
            println!(
                "PASS: {} frames decoded by tick {} [{}]",
                report.decoded.len(),
                report.finished_at,
                hex::encode_upper(&report.decoded)
            );
            Ok(())
        }
        Err(err) => bail!("FAIL: {err}"),
    }
}
