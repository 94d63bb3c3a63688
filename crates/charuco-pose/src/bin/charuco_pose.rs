//! charuco-pose CLI: estimate ChArUco board poses for every listed image.

use charuco_pose::{build_preview, run, CalibTargetsVision, RunError, RunOptions, RunReport};
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "charuco-pose")]
#[command(about = "Detect a ChArUco board in a list of images and write its pose per image")]
#[command(version)]
struct Cli {
    /// Path to the JSON run configuration.
    config: PathBuf,

    /// Do not wait for the operator after each image.
    #[arg(long)]
    headless: bool,

    /// Pause on Enter in the terminal instead of opening the preview window.
    #[cfg(feature = "window")]
    #[arg(long)]
    no_window: bool,

    /// Write annotated frames into this directory.
    #[arg(long, value_name = "DIR")]
    preview_dir: Option<PathBuf>,

    /// Exit with an error when the camera calibration cannot be loaded.
    #[arg(long)]
    require_calibration: bool,

    /// Worker threads for non-interactive runs.
    #[arg(long, short = 'j', default_value_t = 1)]
    jobs: usize,

    /// Length of the drawn pose axes, in board units (overrides the config).
    #[arg(long)]
    axis_length: Option<f32>,

    /// Log level: off, error, warn, info, debug, trace (`RUST_LOG` in tracing builds).
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Emit JSON log lines (tracing builds only).
    #[cfg(feature = "tracing")]
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn options(&self) -> RunOptions {
        RunOptions {
            headless: self.headless,
            preview_dir: self.preview_dir.clone(),
            require_calibration: self.require_calibration,
            jobs: self.jobs,
            axis_length: self.axis_length,
        }
    }
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) {
    calib_targets::core::init_tracing(cli.log_json);
    // RUST_LOG drives the subscriber; --log-level still caps `log` records.
    log::set_max_level(log::max_level().min(cli.log_level));
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) {
    if let Err(err) = calib_targets::core::init_with_level(cli.log_level) {
        eprintln!("failed to install logger: {err}");
    }
}

fn run_cli(
    cli: &Cli,
    options: &RunOptions,
    vision: &CalibTargetsVision,
) -> Result<RunReport, RunError> {
    #[cfg(feature = "window")]
    if !options.headless && !cli.no_window {
        return charuco_pose::run_with_window(&cli.config, options, vision);
    }
    let mut preview = build_preview(options, std::io::stdin().lock())?;
    run(&cli.config, options, vision, preview.as_mut())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let options = cli.options();
    let vision = CalibTargetsVision::new();
    match run_cli(&cli, &options, &vision) {
        Ok(report) => {
            println!(
                "{} of {} image(s) posed, {} record(s) in {}",
                report.summary.posed,
                report.summary.images,
                report.records,
                report.output_path.display()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
