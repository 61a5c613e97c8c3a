// Melodia command line
// Transcribes WAV files into MIDI and manages stored runs

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use melodia_lib::commands::{self, TranscribeFileInput};
use melodia_lib::config::TranscriptionConfig;
use melodia_lib::pipeline::{JobRunner, TranscriptionPool};
use melodia_lib::state::{self, ArtifactStore};
use melodia_lib::transcription::Transcriber;

#[derive(Debug, Parser)]
#[command(name = "melodia")]
#[command(about = "Transcribe sung or hummed melodies into MIDI")]
struct Args {
    /// Output root; defaults to the platform data directory
    #[arg(long, global = true, env = "MELODIA_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Transcribe one or more WAV files
    Transcribe {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Tempo of the MIDI output; estimated from the audio when omitted
        #[arg(long)]
        bpm: Option<f64>,

        /// JSON file overriding transcription settings
        #[arg(long, env = "MELODIA_CONFIG")]
        config: Option<PathBuf>,

        /// Song title, used to name the outputs
        #[arg(long)]
        title: Option<String>,

        /// Artist, used to name the outputs
        #[arg(long)]
        artist: Option<String>,

        /// Concurrent jobs; defaults to available parallelism
        #[arg(long)]
        jobs: Option<usize>,

        /// Abandon any single job after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Skip writing the per-run JSONL trace
        #[arg(long, default_value_t = false)]
        no_trace: bool,
    },

    /// List stored runs
    Runs,

    /// Delete every stored run
    Clean,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let store = match args.out_dir {
        Some(dir) => ArtifactStore::new(dir),
        None => ArtifactStore::open_default()?,
    };

    match args.command {
        Command::Transcribe {
            inputs,
            bpm,
            config,
            title,
            artist,
            jobs,
            timeout_secs,
            no_trace,
        } => {
            let config = match config {
                Some(path) => TranscriptionConfig::from_json_file(&path)?,
                None => TranscriptionConfig::default(),
            };
            if inputs.len() > 1 && (title.is_some() || artist.is_some()) {
                log::warn!("--title/--artist apply to every input; outputs live in separate run directories");
            }

            let transcriber = Transcriber::new(config)?;
            let pool = TranscriptionPool::new(
                JobRunner::new(transcriber),
                jobs.unwrap_or_else(TranscriptionPool::default_parallelism),
            )
            .with_timeout(timeout_secs.map(Duration::from_secs));

            let tasks: Vec<_> = inputs
                .into_iter()
                .map(|path| {
                    let pool = pool.clone();
                    let store = store.clone();
                    let input = TranscribeFileInput {
                        path,
                        bpm,
                        title: title.clone(),
                        artist: artist.clone(),
                        trace: !no_trace,
                    };
                    tokio::spawn(async move {
                        let path = input.path.clone();
                        (path, commands::transcribe_file(&pool, &store, input).await)
                    })
                })
                .collect();

            let mut failures = 0;
            for task in tasks {
                let (path, result) = task.await?;
                match result {
                    Ok(done) => println!(
                        "{}: {} notes at {:.1} BPM ({:?}) -> {}",
                        path.display(),
                        done.notes,
                        done.bpm,
                        done.bpm_source,
                        done.midi_path.display()
                    ),
                    Err(e) => {
                        failures += 1;
                        eprintln!("{}: {}", path.display(), e.message());
                    }
                }
            }

            if failures > 0 {
                return Err(format!("{} of the inputs failed", failures).into());
            }
        }

        Command::Runs => {
            let runs = commands::list_runs(&store).map_err(|e| e.message().to_string())?;
            for run in runs {
                let midi = run
                    .artifact(state::ArtifactKind::Midi)
                    .map(|a| a.path.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {}  {:?}  {}  {}",
                    run.created_at.to_rfc3339(),
                    run.run_id,
                    run.status,
                    run.input_path,
                    midi
                );
            }
        }

        Command::Clean => {
            let removed = commands::cleanup(&store).map_err(|e| e.message().to_string())?;
            println!("Removed {} runs from {}", removed, store.root().display());
        }
    }

    Ok(())
}
