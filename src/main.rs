use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capture_v4l2::video::{
    probe, CaptureConfig, CaptureSession, DeviceHandle, DeviceReport, EncodedImage, PixelFormat,
};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Capture frames from a V4L2 device and write them as JPEG
#[derive(Parser, Debug)]
#[command(name = "capture-v4l2")]
#[command(version, about, long_about = None)]
struct CliArgs {
    /// Video device node
    #[arg(value_name = "DEVICE")]
    device: PathBuf,

    /// Requested frame width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Requested frame height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Requested pixel format (yuyv, mjpeg)
    #[arg(short = 'f', long, default_value = "yuyv")]
    format: PixelFormat,

    /// Number of frames to write
    #[arg(short = 'n', long, default_value_t = 5)]
    frames: u32,

    /// Output file; `{n}` is replaced by the frame number
    #[arg(short = 'o', long, value_name = "FILE", default_value = "output.jpg")]
    output: PathBuf,

    /// JPEG quality (1-100)
    #[arg(short = 'q', long, default_value_t = 92)]
    quality: u32,

    /// Readiness wait per frame in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    timeout_ms: u64,

    /// Consecutive recoverable failures tolerated before giving up
    #[arg(long, value_name = "N", default_value_t = 10)]
    max_retries: u32,

    /// Transcode YUYV through a planar 4:2:0 frame
    #[arg(long)]
    planar: bool,

    /// Print device capabilities and formats, then exit
    #[arg(long)]
    probe: bool,

    /// Print the probe report as JSON
    #[arg(long, requires = "probe")]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.log_json);

    tracing::info!("Starting capture-v4l2 v{}", env!("CARGO_PKG_VERSION"));

    if args.probe {
        return run_probe(&args);
    }

    let config = CaptureConfig::for_device(&args.device)
        .with_resolution(args.width, args.height)
        .with_format(args.format)
        .with_timeout(Duration::from_millis(args.timeout_ms))
        .with_quality(args.quality)
        .with_planar_intermediate(args.planar);

    let mut session = CaptureSession::open_path(&config)
        .with_context(|| format!("Failed to open capture device {}", args.device.display()))?;

    let mut retries = RetryBudget::new(args.max_retries);
    let mut written = 0;
    while written < args.frames {
        match session.capture_jpeg() {
            Ok(image) => {
                let path = write_image(&image, &args.output, written)?;
                tracing::info!(
                    "Wrote frame {} to {} ({} bytes)",
                    written,
                    path.display(),
                    image.len()
                );
                retries.reset();
                written += 1;
            }
            Err(e) if e.is_recoverable() => {
                if !retries.record_failure() {
                    tracing::error!("Giving up on frame {}: {}", written, e);
                    return Err(anyhow::Error::new(e).context(format!(
                        "Frame {} failed {} times in a row",
                        written,
                        retries.failures()
                    )));
                }
                tracing::warn!(
                    "Frame {} not captured ({}/{}), retrying: {}",
                    written,
                    retries.failures(),
                    retries.limit(),
                    e
                );
            }
            Err(e) => {
                tracing::error!("Capture failed: {}", e);
                return Err(e.into());
            }
        }
    }

    session.stop()?;
    Ok(())
}

fn run_probe(args: &CliArgs) -> anyhow::Result<()> {
    let mut device = DeviceHandle::open(&args.device)
        .with_context(|| format!("Failed to open {}", args.device.display()))?;
    let report = probe(&mut device)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

/// Human-readable capability block and format table
fn render_report(report: &DeviceReport) -> String {
    let caps = &report.capabilities;
    let mut out = format!(
        "Driver Caps:\n  Driver: \"{}\"\n  Card: \"{}\"\n  Bus: \"{}\"\n  Version: {}\n  Capabilities: {:08x}\n",
        caps.driver, caps.card, caps.bus_info, caps.version, caps.capabilities
    );
    out.push_str("  FMT : CE Desc\n  --------------------\n");
    for desc in &report.formats {
        out.push_str(&format!("  {}\n", desc));
    }
    out
}

/// Bound on consecutive recoverable failures
#[derive(Debug)]
struct RetryBudget {
    limit: u32,
    failures: u32,
}

impl RetryBudget {
    fn new(limit: u32) -> Self {
        Self { limit, failures: 0 }
    }

    /// Count a failure; false once more than `limit` failures happened in a row
    fn record_failure(&mut self) -> bool {
        self.failures += 1;
        self.failures <= self.limit
    }

    fn reset(&mut self) {
        self.failures = 0;
    }

    fn failures(&self) -> u32 {
        self.failures
    }

    fn limit(&self) -> u32 {
        self.limit
    }
}

/// Write `image` to the output path for frame `n`
fn write_image(image: &EncodedImage, template: &Path, n: u32) -> anyhow::Result<PathBuf> {
    let path = output_path(template, n);
    std::fs::write(&path, &image.data)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Output path for frame `n`
fn output_path(template: &Path, n: u32) -> PathBuf {
    let raw = template.to_string_lossy();
    if raw.contains("{n}") {
        PathBuf::from(raw.replace("{n}", &n.to_string()))
    } else {
        template.to_path_buf()
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "capture_v4l2=error",
        LogLevel::Warn => "capture_v4l2=warn",
        LogLevel::Info => "capture_v4l2=info",
        LogLevel::Verbose => "capture_v4l2=debug",
        LogLevel::Debug => "capture_v4l2=debug",
        LogLevel::Trace => "capture_v4l2=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
