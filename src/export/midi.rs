// MIDI export
// Writes an event track as a single-track Standard MIDI File using midly

use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::groove::quantize::{EventTrack, NoteEvent, TempoMarker};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write MIDI: {0}")]
    Write(String),

    #[error("Failed to parse MIDI: {0}")]
    Parse(#[from] midly::Error),

    #[error("Unsupported MIDI file: {0}")]
    Unsupported(String),

    #[error("Invalid export options: {0}")]
    InvalidOptions(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Turns an event track into file bytes
pub trait NoteEventWriter: Send + Sync {
    fn write(&self, track: &EventTrack) -> Result<Vec<u8>, ExportError>;

    /// File extension for the produced bytes, without the dot
    fn extension(&self) -> &'static str {
        "mid"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiExportOptions {
    /// Pulses per quarter note, typically 480 or 960
    pub ppq: u16,

    /// MIDI channel, 0-based
    pub channel: u8,

    /// Optional track name meta event
    pub track_name: Option<String>,
}

impl Default for MidiExportOptions {
    fn default() -> Self {
        MidiExportOptions {
            ppq: 480,
            channel: 0,
            track_name: Some("Melody".to_string()),
        }
    }
}

/// Standard MIDI File writer: format 0, tempo at tick 0, one note channel
#[derive(Debug, Clone, Default)]
pub struct SmfWriter {
    options: MidiExportOptions,
}

impl SmfWriter {
    pub fn new(options: MidiExportOptions) -> Self {
        SmfWriter { options }
    }

    pub fn options(&self) -> &MidiExportOptions {
        &self.options
    }

    fn validate(&self) -> Result<(), ExportError> {
        if self.options.ppq == 0 || self.options.ppq > 0x7FFF {
            return Err(ExportError::InvalidOptions(format!(
                "PPQ must be in 1..=32767, got {}",
                self.options.ppq
            )));
        }
        if self.options.channel > 15 {
            return Err(ExportError::InvalidOptions(format!(
                "channel must be in 0..=15, got {}",
                self.options.channel
            )));
        }
        Ok(())
    }

    fn to_ticks(&self, quarters: f64) -> u32 {
        let ticks = (quarters * self.options.ppq as f64).round();
        if ticks.is_finite() && ticks > 0.0 {
            ticks.min(u32::MAX as f64) as u32
        } else {
            0
        }
    }

    /// Absolute-tick note messages, note-offs ahead of note-ons at equal ticks
    fn note_messages(&self, notes: &[NoteEvent]) -> Vec<(u32, MidiMessage)> {
        let mut messages: Vec<(u32, u8, MidiMessage)> = Vec::with_capacity(notes.len() * 2);

        for note in notes {
            let tick_on = self.to_ticks(note.position);
            let tick_off = self.to_ticks(note.position + note.duration).max(tick_on + 1);
            let key = note.pitch.min(127);

            // A note-on with velocity 0 is a note-off, so the quietest note keeps 1
            let vel = note.velocity.clamp(1, 127);

            messages.push((
                tick_on,
                1,
                MidiMessage::NoteOn {
                    key: key.into(),
                    vel: vel.into(),
                },
            ));
            messages.push((
                tick_off,
                0,
                MidiMessage::NoteOff {
                    key: key.into(),
                    vel: 0.into(),
                },
            ));
        }

        messages.sort_by_key(|(tick, rank, _)| (*tick, *rank));
        messages
            .into_iter()
            .map(|(tick, _, message)| (tick, message))
            .collect()
    }
}

impl NoteEventWriter for SmfWriter {
    fn write(&self, track: &EventTrack) -> Result<Vec<u8>, ExportError> {
        self.validate()?;

        let header = Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(self.options.ppq.into()),
        };

        let mut events: Track = Track::new();

        if let Some(name) = &self.options.track_name {
            events.push(TrackEvent {
                delta: 0.into(),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
            });
        }

        events.push(TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(micros_per_quarter(track.tempo.bpm).into())),
        });

        let channel = self.options.channel;
        let mut last_tick = 0u32;
        for (tick, message) in self.note_messages(&track.notes) {
            events.push(TrackEvent {
                delta: tick.saturating_sub(last_tick).into(),
                kind: TrackEventKind::Midi {
                    channel: channel.into(),
                    message,
                },
            });
            last_tick = tick;
        }

        events.push(TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let smf = Smf {
            header,
            tracks: vec![events],
        };

        let mut bytes = Vec::new();
        smf.write(&mut bytes)
            .map_err(|e| ExportError::Write(e.to_string()))?;

        log::debug!(
            "Wrote {} notes at {:.1} BPM into {} MIDI bytes",
            track.notes.len(),
            track.tempo.bpm,
            bytes.len()
        );

        Ok(bytes)
    }
}

/// Tempo meta value, clamped to the 24-bit field
fn micros_per_quarter(bpm: f64) -> u32 {
    let micros = (60_000_000.0 / bpm).round();
    if micros.is_finite() && micros >= 1.0 {
        micros.min(0xFF_FFFF as f64) as u32
    } else {
        0xFF_FFFF
    }
}

/// Parse a single-tempo MIDI file back into an event track
///
/// Only the first tempo meta event is kept; notes from every track and
/// channel are merged and sorted by position.
pub fn read_event_track(bytes: &[u8]) -> Result<EventTrack, ExportError> {
    let smf = Smf::parse(bytes)?;

    let ppq = match smf.header.timing {
        Timing::Metrical(ppq) => ppq.as_int() as f64,
        Timing::Timecode(fps, sub) => {
            return Err(ExportError::Unsupported(format!(
                "timecode timing ({} fps, {} subframes)",
                fps.as_f32(),
                sub
            )))
        }
    };
    if ppq == 0.0 {
        return Err(ExportError::Unsupported("zero PPQ".to_string()));
    }

    let mut tempo: Option<f64> = None;
    let mut notes = Vec::new();

    for track in &smf.tracks {
        let mut tick = 0u64;
        let mut sounding: Vec<(u8, u64, u8)> = Vec::new();

        for event in track {
            tick += event.delta.as_int() as u64;

            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(micros)) if tempo.is_none() => {
                    let micros = micros.as_int();
                    if micros > 0 {
                        tempo = Some(60_000_000.0 / micros as f64);
                    }
                }
                TrackEventKind::Midi { message, .. } => match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        sounding.push((key.as_int(), tick, vel.as_int()));
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        if let Some(i) = sounding.iter().position(|(k, _, _)| *k == key.as_int()) {
                            let (pitch, start, velocity) = sounding.remove(i);
                            notes.push(NoteEvent {
                                position: start as f64 / ppq,
                                duration: (tick - start) as f64 / ppq,
                                pitch,
                                velocity,
                            });
                        }
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    notes.sort_by(|a, b| a.position.total_cmp(&b.position));

    Ok(EventTrack {
        tempo: TempoMarker {
            position: 0.0,
            bpm: tempo.unwrap_or(crate::groove::quantize::DEFAULT_BPM),
        },
        notes,
    })
}
