use nrfdfu_transport::config::{DEFAULT_DATA_PACKET_SIZE, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT, MAX_RETRIES};
use nrfdfu_transport::package::{self, Component};
use nrfdfu_transport::transport_btleplug::DfuLinkManagerBtleplug;
use nrfdfu_transport::{DfuConfig, DfuLinkManager, DfuTransport};

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Update firmware on nRF BLE DFU targets
#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// BLE DFU target name or address
    target: String,

    /// Data packet size in bytes
    #[arg(long, default_value_t = DEFAULT_DATA_PACKET_SIZE)]
    packet_size: usize,

    /// Packets between checksum requests (0 checks once per object)
    #[arg(long, default_value_t = 0)]
    prn: u16,

    /// Control point response timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,

    /// Attempts per object
    #[arg(long, default_value_t = MAX_RETRIES)]
    retries: u32,

    /// Delay between attempts in milliseconds
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY.as_millis() as u64)]
    retry_delay_ms: u64,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update application
    App {
        /// DFU package path
        pkg: String,
    },
    /// Update bootloader
    Bl {
        /// DFU package path
        pkg: String,
    },
    /// Update SoftDevice
    Sd {
        /// DFU package path
        pkg: String,
    },
    /// Update SoftDevice and Bootloader
    Sdbl {
        /// DFU package path
        pkg: String,
    },
}

impl Args {
    fn config(&self) -> DfuConfig {
        DfuConfig {
            packet_size: self.packet_size,
            prn: self.prn,
            command_timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "nrfdfu_transport=debug"
    } else {
        "nrfdfu_transport=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let (pkg, component) = match &args.command {
        Commands::App { pkg } => (pkg, Component::Application),
        Commands::Bl { pkg } => (pkg, Component::Bootloader),
        Commands::Sd { pkg } => (pkg, Component::SoftDevice),
        Commands::Sdbl { pkg } => (pkg, Component::SoftDeviceBootloader),
    };
    let images = package::extract(pkg, component)?;

    let manager = DfuLinkManagerBtleplug::new().await?;
    let link = manager.connect(&args.target).await?;

    let pb = ProgressBar::new(images.fw_pkt.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{msg} [{elapsed}] [{wide_bar:.blue/white}] {bytes}/{total_bytes} ({bytes_per_sec})")?
            .progress_chars("#> "),
    );
    pb.set_message("Uploading...");

    let progress = pb.clone();
    let dfu = DfuTransport::new(link, args.config()).with_progress(move |done, _total| progress.set_position(done));

    let abort = dfu.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("aborting after the current object");
            abort.abort();
        }
    });

    dfu.run(&images.init_pkt, &images.fw_pkt)
        .await
        .context("DFU failed")?;
    pb.finish_with_message("Done");

    Ok(())
}
