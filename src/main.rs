//! `nirscan` daemon entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::oneshot;
use tracing::{info, warn};

use nirscan::config::ScannerConfig;
use nirscan::controller::{
    ButtonMonitor, CommandDispatcher, GpioButtons, LogIndicator, Orchestrator, StatusIndicator,
};
use nirscan::secure::{self, ChannelKeys};
use nirscan::sensor::sim::SimulatedSensor;
use nirscan::sensor::{SensorLink, SensorPort};
use nirscan::sink::{Classifier, IpcClassifier, RemoteClient, ResultSink};

#[derive(Parser)]
#[command(name = "nirscan")]
#[command(version)]
#[command(about = "Handheld NIR fabric classifier controller", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "config/nirscan.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller until Ctrl-C
    Run {
        /// Talk to an in-process simulated spectrometer instead of the serial port
        #[arg(long)]
        simulate: bool,
    },
    /// Seal a plaintext companion-app command with the configured channel keys
    Seal { plaintext: String },
    /// Verify and decrypt a sealed envelope
    Open { envelope: String },
    /// Print the built-in default configuration as TOML
    DefaultConfig,
}

/// How long shutdown waits for blocking work, such as a pending stdin read.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start the async runtime")?;
    let result = runtime.block_on(start(Cli::parse()));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn start(cli: Cli) -> Result<()> {
    if let Command::DefaultConfig = cli.command {
        print!("{}", ScannerConfig::default().to_toml()?);
        return Ok(());
    }

    let config = ScannerConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    nirscan::logging::init_from_config(&config.application)?;

    match cli.command {
        Command::Run { simulate } => run(config, simulate).await,
        Command::Seal { plaintext } => {
            let keys = ChannelKeys::from_config(&config.channel)?;
            println!("{}", secure::seal(&plaintext, &keys)?);
            Ok(())
        }
        Command::Open { envelope } => {
            let keys = ChannelKeys::from_config(&config.channel)?;
            let plaintext = secure::try_open(&envelope, &keys).context("envelope rejected")?;
            println!("{plaintext}");
            Ok(())
        }
        Command::DefaultConfig => Ok(()),
    }
}

async fn run(config: ScannerConfig, simulate: bool) -> Result<()> {
    let keys = ChannelKeys::from_config(&config.channel).context("invalid channel keys")?;
    let remote = RemoteClient::new(&config.api, config.application.device_id)?;
    let classifier: Arc<dyn Classifier> = Arc::new(IpcClassifier::new(&config.inference));
    let sink = ResultSink::connect(remote, classifier).await;

    if simulate {
        let (stream, _sim) = SimulatedSensor::new(config.sensor.byte_order).spawn();
        info!("using simulated spectrometer");
        let link = SensorLink::with_port(stream, &config.sensor);
        return Box::pin(serve(link, sink, keys, &config)).await;
    }

    #[cfg(feature = "tokio_serial")]
    {
        let link = SensorLink::open(&config.sensor).await?;
        Box::pin(serve(link, sink, keys, &config)).await
    }
    #[cfg(not(feature = "tokio_serial"))]
    {
        anyhow::bail!("built without serial support; pass --simulate")
    }
}

async fn serve<P: SensorPort + 'static>(
    mut link: SensorLink<P>,
    sink: ResultSink,
    keys: ChannelKeys,
    config: &ScannerConfig,
) -> Result<()> {
    let info = link.identify().await.context("sensor identification failed")?;
    info!(?info, "sensor identified");
    let sensor = &config.sensor;
    link.negotiate_wavelengths(
        sensor.wavelength_count,
        sensor.min_wavelength_nm,
        sensor.max_wavelength_nm,
    )
    .await
    .context("wavelength negotiation failed")?;

    let indicator: Arc<dyn StatusIndicator> = Arc::new(LogIndicator);
    let orchestrator = Orchestrator::new(link, sink, indicator);
    let handle = orchestrator.handle();

    let buttons = GpioButtons::open(&config.buttons).context("cannot open button lines")?;
    let monitor = if buttons.is_empty() {
        info!("no buttons configured");
        None
    } else {
        Some(ButtonMonitor::new(buttons, handle.triggers().clone(), &config.buttons).spawn()?)
    };

    let dispatcher = CommandDispatcher::new(keys, &handle);
    let bridge = tokio::spawn(async move {
        let input = BufReader::new(tokio::io::stdin());
        if let Err(e) = dispatcher.serve_lines(input, tokio::io::stdout()).await {
            warn!(error = %e, "command bridge stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let orchestrator_task = tokio::spawn(orchestrator.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");

    if shutdown_tx.send(()).is_err() {
        warn!("orchestrator already stopped");
    }
    bridge.abort();
    orchestrator_task.await.context("orchestrator task failed")?;
    if let Some(monitor) = monitor {
        tokio::task::spawn_blocking(move || monitor.stop()).await?;
    }
    Ok(())
}
