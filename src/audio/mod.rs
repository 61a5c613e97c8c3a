// Audio processing module
// WAV ingestion, the per-frame pitch / energy signal sources and spectral flux onsets

pub mod energy;
pub mod flux;
pub mod frames;
pub mod ingest;
pub mod pitch;

pub use energy::{EnergyProfileSource, RmsEnergySource};
pub use flux::{detect_flux_onsets, FluxConfig};
pub use frames::SourceError;
pub use ingest::{ingest_wav, ingest_wav_file, AudioClip, AudioError};
pub use pitch::{estimate_tuning, PitchContourSource, YinConfig, YinPitchSource};
