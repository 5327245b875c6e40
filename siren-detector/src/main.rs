/// Siren detection service binary
///
/// Listens on an ALSA capture device and drives a GPIO line while a siren is
/// detected.

use anyhow::Context;
use clap::Parser;
use siren_detector::{
    default_engine, list_input_devices, CpalCapture, DetectionOutput, DetectorConfig, GpioOutput,
    LogOutput, Pipeline, PipelineError, PipelineStats, SlidingAudioClassifier, WindowRecorder,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEVICE_HELP: &str = "\
Requires one parameter (ID of the sound card) in the form of plughw:1,0
(where 1=card number, 0=device).
You can find these via `cat /proc/asound/cards`. E.g. for:
   0 [Headphones     ]: bcm2835_headphonbcm2835 Headphones - bcm2835 Headphones
                        bcm2835 Headphones
   1 [Webcam         ]: USB-Audio - C922 Pro Stream Webcam
                        C922 Pro Stream Webcam at usb-0000:01:00.0-1.3, high speed
The ID for 'C922 Pro Stream Webcam' is then plughw:1,0
Run with --list-devices to see the names this host reports.";

/// Siren detector: microphone audio in, debounced GPIO signal out
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = DEVICE_HELP)]
struct Args {
    /// Capture device, e.g. plughw:1,0 (or "default")
    device: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// BCM number of the output GPIO line
    #[arg(long)]
    gpio_pin: Option<u8>,

    /// Confidence below which the monitored label counts as detected
    #[arg(long)]
    threshold: Option<f32>,

    /// Save the window that raised the line as WAV into this directory
    #[arg(long)]
    record_dir: Option<PathBuf>,

    /// Enable the moving-average filter over classification results
    #[arg(long)]
    maf: bool,

    /// Log detections instead of driving GPIO
    #[arg(long)]
    no_gpio: bool,

    /// Ask the inference engine for debug output
    #[arg(long)]
    debug: bool,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_directive = if args.verbose {
        "siren_detector=debug"
    } else {
        "siren_detector=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .init();

    if args.list_devices {
        list_devices_and_exit();
    }

    let Some(device) = args.device.clone() else {
        println!("{}", DEVICE_HELP);
        std::process::exit(1);
    };

    let config = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    info!("Starting siren detector v{}", siren_detector::VERSION);
    info!("Device: {}", device);

    let use_gpio = !args.no_gpio;
    let shutdown = Arc::new(AtomicBool::new(false));
    let pipeline_shutdown = Arc::clone(&shutdown);

    // Audio streams are not Send, so everything hardware-facing is built and
    // dropped on the blocking thread that runs the loop.
    let mut handle = tokio::task::spawn_blocking(move || {
        run_pipeline(&device, &config, use_gpio, pipeline_shutdown)
    });

    let outcome = tokio::select! {
        res = &mut handle => res,
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, stopping...");
            shutdown.store(true, Ordering::Release);
            handle.await
        }
    };

    match outcome {
        Ok(Ok(stats)) => {
            info!(
                "Siren detector stopped: {} slices, {} classifications, {} activations",
                stats.slices_read, stats.classifications, stats.activations
            );
        }
        Ok(Err(e)) => {
            error!("{}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Pipeline thread failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Build every component and run the loop until shutdown or a fatal error
fn run_pipeline(
    device: &str,
    config: &DetectorConfig,
    use_gpio: bool,
    shutdown: Arc<AtomicBool>,
) -> Result<PipelineStats, PipelineError> {
    config.validate()?;

    let engine = default_engine(config)?;
    let classifier = SlidingAudioClassifier::new(config, engine)?;

    let output: Box<dyn DetectionOutput> = if use_gpio {
        Box::new(GpioOutput::open(config.gpio_pin)?)
    } else {
        Box::new(LogOutput::new())
    };

    let capture = CpalCapture::open(
        device,
        config.sample_rate,
        config.raw_sample_count * 2,
        Arc::clone(&shutdown),
    )?;
    info!("Listening on {}", capture.device_name());

    let mut pipeline = Pipeline::new(capture, classifier, output, shutdown)?;
    if let Some(dir) = &config.record_dir {
        pipeline = pipeline.with_recorder(WindowRecorder::new(dir, config.sample_rate)?);
    }

    pipeline.run()
}

/// Load configuration from file (if given) and apply CLI overrides
fn load_config(args: &Args) -> anyhow::Result<DetectorConfig> {
    let mut config = match &args.config {
        Some(path) => DetectorConfig::from_file(path)
            .with_context(|| format!("Cannot use config file {}", path.display()))?,
        None => DetectorConfig::default(),
    };

    if let Some(pin) = args.gpio_pin {
        config.gpio_pin = pin;
    }
    if let Some(threshold) = args.threshold {
        config.detection_threshold = threshold;
    }
    if let Some(dir) = &args.record_dir {
        config.record_dir = Some(dir.clone());
    }
    config.moving_average |= args.maf;
    config.debug |= args.debug;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn list_devices_and_exit() -> ! {
    match list_input_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("No input devices found.");
            std::process::exit(0);
        }
        Ok(devices) => {
            println!("Available input devices:");
            for device in devices {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("  {}{}", device.name, marker);
            }
            std::process::exit(0);
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            std::process::exit(1);
        }
    }
}
