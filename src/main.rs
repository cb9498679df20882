use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use thz_deconvolution::analysis::{find_echoes, layer_thicknesses};
use thz_deconvolution::config::{DeconvolutionSettings, SETTINGS_KEY};
use thz_deconvolution::error::{DeconvolutionError, Result};
use thz_deconvolution::filters::filter::registered_filters;
use thz_deconvolution::io::{save_impulse_csv, save_result_npz, save_transfer_csv};
use thz_deconvolution::logger::init_cli_logger;
use thz_deconvolution::manifest::{Manifest, PackageInfo};
use thz_deconvolution::psf::PSF;
use thz_deconvolution::worker::{spawn_worker, WorkerCommand, WorkerEvent};
use thz_deconvolution::DeconvolutionResult;

/// How often the progress of a running deconvolution is printed.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(version, about = "THz-TDS deconvolution")]
struct Cli {
    /// Print debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deconvolve a sample trace or scan with a reference trace
    Run(RunArgs),
    /// List the available filters and deconvolution methods
    Methods,
    /// Show or reset the stored settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Print and validate the package metadata
    Manifest,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    Reset,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Reference trace (.csv, .txt, .npy or .npz)
    #[arg(short, long)]
    reference: PathBuf,
    /// Sample trace or scan (.csv, .txt, .npy or .npz)
    #[arg(short, long)]
    sample: PathBuf,
    /// Deconvolution method, overrides the stored settings
    #[arg(short, long)]
    method: Option<String>,
    /// Comma separated list of filters, overrides the stored settings
    #[arg(long, value_delimiter = ',')]
    filters: Option<Vec<String>>,
    /// Beam PSF (.npz) used by the PSF deconvolution
    #[arg(long)]
    psf: Option<PathBuf>,
    /// Output file, `.npz` for the complete result, otherwise the impulse response as csv
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Transfer function (amplitude and phase) of the selected pixel as csv
    #[arg(long)]
    transfer: Option<PathBuf>,
    /// Pixel used for csv export and echo detection
    #[arg(long, num_args = 2, value_names = ["X", "Y"], default_values_t = [0, 0])]
    pixel: Vec<usize>,
    /// Print the echoes and layer thicknesses of the selected pixel
    #[arg(long)]
    echoes: bool,
    /// Store the settings used for this run
    #[arg(long)]
    save_settings: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_cli_logger(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Methods => {
            list_methods();
            Ok(())
        }
        Command::Settings { action } => settings(action),
        Command::Manifest => manifest(),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut settings = DeconvolutionSettings::load_or_default(SETTINGS_KEY);
    if let Some(method) = &args.method {
        settings.method = method.clone();
    }
    if let Some(filters) = &args.filters {
        settings.filters = filters.iter().map(|f| f.trim().to_string()).collect();
    }
    if let Some(psf) = &args.psf {
        settings.psf = PSF::load_npz(psf)?;
    }
    settings.validate()?;
    if args.save_settings {
        settings.store(SETTINGS_KEY)?;
    }
    let (x, y) = (args.pixel[0], args.pixel[1]);

    let worker = spawn_worker(settings.clone())?;
    let communication = worker.communication.clone();
    communication.send(WorkerCommand::LoadReference(args.reference.clone()))?;
    communication.send(WorkerCommand::LoadSample(args.sample.clone()))?;
    communication.send(WorkerCommand::Run)?;

    let mut progress_shown = false;
    let result = loop {
        match communication.event_rx.recv_timeout(PROGRESS_INTERVAL) {
            Ok(WorkerEvent::ReferenceLoaded { samples }) => {
                log::info!("reference: {samples} samples");
            }
            Ok(WorkerEvent::SampleLoaded {
                width,
                height,
                samples,
            }) => {
                log::info!("sample: {width} x {height} pixels, {samples} samples");
            }
            Ok(WorkerEvent::Finished(result)) => break result,
            Ok(WorkerEvent::Failed(message)) => {
                if progress_shown {
                    eprintln!();
                }
                worker.join()?;
                return Err(DeconvolutionError::Worker { message });
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if let Some(progress) = communication.progress() {
                    eprint!("\rprogress: {:5.1} %", progress * 100.0);
                    progress_shown = true;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                return Err(DeconvolutionError::Worker {
                    message: "the worker stopped unexpectedly".to_string(),
                });
            }
        }
    };
    if progress_shown {
        eprintln!();
    }
    worker.join()?;

    for (name, duration) in &result.timings {
        log::debug!("{name}: {duration:?}");
    }
    if let Some(output) = &args.output {
        save_output(output, &result, x, y)?;
    }
    if let Some(transfer) = &args.transfer {
        save_transfer_csv(transfer, &result, x, y)?;
        log::info!("saved transfer function to {transfer:?}");
    }
    if args.echoes {
        print_echoes(&result, &settings, x, y)?;
    }
    Ok(())
}

fn save_output(path: &Path, result: &DeconvolutionResult, x: usize, y: usize) -> Result<()> {
    let is_npz = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("npz"));
    if is_npz {
        save_result_npz(path, result)
    } else {
        save_impulse_csv(path, result, x, y)?;
        log::info!("saved impulse response of pixel ({x}, {y}) to {path:?}");
        Ok(())
    }
}

fn print_echoes(
    result: &DeconvolutionResult,
    settings: &DeconvolutionSettings,
    x: usize,
    y: usize,
) -> Result<()> {
    let impulse = result
        .impulse_trace(x, y)
        .ok_or_else(|| DeconvolutionError::config(format!("pixel ({x}, {y}) is out of range")))?;
    let echoes = find_echoes(
        result.time.view(),
        impulse.view(),
        settings.echoes.threshold,
        settings.echoes.min_separation,
    );
    println!("{:>6} {:>12} {:>12}", "echo", "time/ps", "amplitude");
    for (i, echo) in echoes.iter().enumerate() {
        println!("{:>6} {:>12.4} {:>12.5}", i, echo.time, echo.amplitude);
    }
    let thicknesses = layer_thicknesses(&echoes, settings.echoes.refractive_index);
    for (i, d) in thicknesses.iter().enumerate() {
        println!(
            "layer {i}: {:.4} mm (n = {})",
            d, settings.echoes.refractive_index
        );
    }
    Ok(())
}

fn list_methods() {
    for config in registered_filters() {
        println!("{} [{:?}]", config.name, config.domain);
        println!("    {}", config.description);
        if let Some((label, url)) = config.hyperlink {
            match label {
                Some(label) => println!("    {label}: {url}"),
                None => println!("    {url}"),
            }
        }
    }
}

fn settings(action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Show => {
            let settings = DeconvolutionSettings::load_or_default(SETTINGS_KEY);
            let text = toml::to_string_pretty(&settings)
                .map_err(|err| DeconvolutionError::config(err.to_string()))?;
            println!("{text}");
        }
        SettingsAction::Reset => {
            DeconvolutionSettings::default().store(SETTINGS_KEY)?;
            log::info!("settings reset to defaults");
        }
    }
    Ok(())
}

fn manifest() -> Result<()> {
    let info = PackageInfo::current();
    println!("{info}");
    println!("build: {} ({})", env!("GIT_HASH"), env!("GIT_BRANCH"));
    let version = Manifest::embedded()?.validate()?;
    println!("manifest valid, version {version}");
    Ok(())
}
