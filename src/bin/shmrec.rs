//! Command line recorder
//!
//! ```text
//! shmrec --cid=111 --name=video0.i420 --width=640 --height=480 --verbose
//! ```

use std::process::ExitCode;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shmrec::config::{EncoderBackend, RecorderConfig, USAGE};
use shmrec::driver::RunSummary;
use shmrec::encoder::{Encoder, SyntheticEncoder};
use shmrec::remote::UdpCommandSource;
use shmrec::sources::{YuvFileSource, resolve_region_path};
use shmrec::{Recorder, RecorderError};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match RecorderConfig::from_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("shmrec: {}", e);
            for suggestion in e.recovery_suggestions() {
                eprintln!("  - {}", suggestion);
            }
            eprintln!("\n{}", USAGE);
            return ExitCode::from(1);
        }
    };

    init_tracing(config.verbose);

    match run(config).await {
        Ok(summary) => {
            info!(
                exit = ?summary.exit,
                frames = summary.frames,
                records = summary.records,
                dropped = summary.dropped,
                bytes = summary.bytes,
                mean_latency_ms = summary.mean_latency.map(|d| d.as_secs_f64() * 1000.0),
                max_latency_ms = summary.max_latency.as_secs_f64() * 1000.0,
                "Recorder finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            if let Some(recorder_error) = e.downcast_ref::<RecorderError>() {
                for suggestion in recorder_error.recovery_suggestions() {
                    error!("  - {}", suggestion);
                }
            }
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "shmrec=debug" } else { "shmrec=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn run(config: RecorderConfig) -> anyhow::Result<RunSummary> {
    let encoder_config = config.encoder_config()?;
    let geometry = encoder_config.geometry;
    let name = config.name.clone().unwrap_or_default();

    let path = resolve_region_path(&name);
    let source = YuvFileSource::open(&path, geometry, encoder_config.fps)
        .with_context(|| format!("Failed to attach to frame region '{}'", name))?
        .looping(config.looping);

    let encoder = select_encoder(&config)?;
    info!(
        region = %path.display(),
        width = geometry.width,
        height = geometry.height,
        codec = %encoder.codec(),
        remote = config.remote,
        "Recorder starting"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, stopping after the current frame");
                    cancel.cancel();
                }
                Err(e) => warn!("Cannot listen for interrupts: {}", e),
            }
        });
    }

    let recorder = Recorder::from_config(&config);
    let summary = if config.remote {
        let commands = UdpCommandSource::join(config.control_group()?)
            .await
            .context("Failed to join the control channel")?;
        recorder.record_remote(source, encoder, &encoder_config, commands, cancel).await?
    } else {
        recorder.record(source, encoder, &encoder_config, cancel).await?
    };
    Ok(summary)
}

fn select_encoder(config: &RecorderConfig) -> anyhow::Result<Box<dyn Encoder>> {
    match config.encoder {
        EncoderBackend::Synthetic => {
            warn!("Using the synthetic encoder, records will not contain real video");
            Ok(Box::new(SyntheticEncoder::new(config.synthetic_size)))
        }
        #[cfg(feature = "openh264")]
        EncoderBackend::OpenH264 => Ok(Box::new(shmrec::encoder::OpenH264Encoder::new())),
        #[cfg(not(feature = "openh264"))]
        EncoderBackend::OpenH264 => anyhow::bail!("This build has no openh264 support; use --encoder=synthetic"),
    }
}
