use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fretboard_trainer::calibration::{CalibrationState, HardwareCalibration};
use fretboard_trainer::config::AppConfig;
use fretboard_trainer::fixtures::synth::{render_exercise, RenderOptions, DEFAULT_SEED};
use fretboard_trainer::fixtures::{
    read_wav, write_wav, ExpectationDiff, Exercise, FixtureExpectations, FixtureReport,
    FixtureRunner,
};

#[derive(Parser, Debug)]
#[command(
    name = "fret_cli",
    about = "Offline detection and judging harness for the fretboard trainer"
)]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Judge a recording against an exercise and print the JSON report
    Run {
        #[arg(long)]
        exercise: PathBuf,
        #[arg(long)]
        wav: PathBuf,
        /// Expectations file overriding the ones embedded in the exercise
        #[arg(long)]
        expect: Option<PathBuf>,
        /// Hardware calibration JSON produced by `calibrate`
        #[arg(long)]
        calibration: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print one JSON line of detection output per tick
    Detect {
        #[arg(long)]
        wav: PathBuf,
        /// Expected MIDI pitch fed to the fusion policy
        #[arg(long)]
        pitch: Option<i32>,
    },
    /// Synthesise an exercise to a mono 16-bit WAV
    Render {
        #[arg(long)]
        exercise: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 44_100)]
        sample_rate: u32,
        #[arg(long, default_value_t = 0.25)]
        amplitude: f32,
        #[arg(long, default_value_t = 0.0)]
        noise: f32,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },
    /// Build a hardware calibration from six open-string recordings (low E first)
    Calibrate {
        #[arg(long = "wav", num_args = 6, required = true)]
        wavs: Vec<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    fretboard_trainer::init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .map(AppConfig::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::Run {
            exercise,
            wav,
            expect,
            calibration,
            output,
        } => run_exercise(config, &exercise, &wav, expect, calibration, output),
        Commands::Detect { wav, pitch } => run_detect(config, &wav, pitch),
        Commands::Render {
            exercise,
            output,
            sample_rate,
            amplitude,
            noise,
            seed,
        } => {
            let options = RenderOptions {
                sample_rate,
                amplitude,
                noise_amplitude: noise,
                seed,
                ..RenderOptions::default()
            };
            run_render(&exercise, &output, &options)
        }
        Commands::Calibrate { wavs, output } => run_calibrate(config, &wavs, output),
    }
}

fn run_exercise(
    config: AppConfig,
    exercise_path: &Path,
    wav: &Path,
    override_expect: Option<PathBuf>,
    calibration_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let exercise = Exercise::load(exercise_path)?;
    let (samples, sample_rate) = read_wav(wav)?;

    let mut state = CalibrationState::from_config(&config.calibration);
    if let Some(path) = calibration_path {
        let json = fs::read_to_string(&path)
            .with_context(|| format!("reading calibration {}", path.display()))?;
        let hardware: HardwareCalibration = serde_json::from_str(&json)
            .with_context(|| format!("parsing calibration {}", path.display()))?;
        state.apply_hardware(hardware);
    }

    let runner = FixtureRunner::new(config, Arc::new(RwLock::new(state)));
    let report = runner
        .run(&exercise, &samples, sample_rate)
        .with_context(|| format!("judging {}", wav.display()))?;

    emit_json(&report_payload(&report, sample_rate), output_path)?;

    let expectations = match override_expect {
        Some(path) => Some(load_expectations(&path)?),
        None => exercise.expectations,
    };
    match expectations.map(|expectations| expectations.verify(&report.summary)) {
        Some(Err(diff)) => {
            emit_diff(&diff)?;
            Ok(ExitCode::from(2))
        }
        _ => Ok(ExitCode::from(0)),
    }
}

fn run_detect(config: AppConfig, wav: &Path, pitch: Option<i32>) -> Result<ExitCode> {
    let (samples, sample_rate) = read_wav(wav)?;
    let runner = FixtureRunner::with_default_calibration(config);
    let lines = runner
        .detect(&samples, sample_rate, pitch)
        .with_context(|| format!("detecting {}", wav.display()))?;

    for line in lines {
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(ExitCode::from(0))
}

fn run_render(exercise_path: &Path, output: &Path, options: &RenderOptions) -> Result<ExitCode> {
    let exercise = Exercise::load(exercise_path)?;
    let samples = render_exercise(&exercise, options);
    write_wav(output, &samples, options.sample_rate)?;
    eprintln!(
        "Rendered '{}' ({} events, {:.2}s) to {}",
        exercise.name,
        exercise.events.len(),
        samples.len() as f64 / options.sample_rate as f64,
        output.display()
    );
    Ok(ExitCode::from(0))
}

fn run_calibrate(config: AppConfig, wavs: &[PathBuf], output: Option<PathBuf>) -> Result<ExitCode> {
    let runner = FixtureRunner::with_default_calibration(config.clone());
    let captures = wavs
        .iter()
        .map(|path| {
            let (samples, sample_rate) = read_wav(path)?;
            runner
                .capture_string(&samples, sample_rate)
                .with_context(|| format!("capturing {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let calibration =
        HardwareCalibration::from_captures(&captures, config.calibration.hardware_margin_db)?;
    emit_json(&calibration, output)?;
    Ok(ExitCode::from(0))
}

fn load_expectations(path: &Path) -> Result<FixtureExpectations> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("reading expectations {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

fn emit_json<T: serde::Serialize>(value: &T, output_path: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    if let Some(path) = output_path {
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }

    Ok(())
}

fn emit_diff(diff: &ExpectationDiff) -> Result<()> {
    let json = serde_json::to_string_pretty(&diff.to_json())?;
    eprintln!("{json}");
    Ok(())
}

fn report_payload(report: &FixtureReport, sample_rate: u32) -> ReportPayload<'_> {
    ReportPayload {
        exercise: &report.exercise,
        sample_rate,
        ticks: report.ticks,
        summary: &report.summary,
        verdicts: &report.verdicts,
    }
}

#[derive(serde::Serialize)]
struct ReportPayload<'a> {
    exercise: &'a str,
    sample_rate: u32,
    ticks: usize,
    summary: &'a fretboard_trainer::session::SessionSummary,
    #[serde(skip_serializing_if = "slice_empty")]
    verdicts: &'a [fretboard_trainer::fixtures::TimedVerdict],
}

fn slice_empty(verdicts: &&[fretboard_trainer::fixtures::TimedVerdict]) -> bool {
    verdicts.is_empty()
}
