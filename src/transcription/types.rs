// Transcription data types
// Pitch range, note-state encoding, pitch frames, and decoded notes

use serde::{Deserialize, Serialize};

/// Note names within one octave, starting at C
const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Equal-tempered frequency (Hz) of every supported pitch, indexed by pitch index.
/// Index 0 is C2 (MIDI 36), index 48 is C6 (MIDI 84).
const NOTE_TABLE_HZ: [f64; PitchRange::COUNT] = [
    65.406391, 69.295658, 73.416192, 77.781746, 82.406889, 87.307058,
    92.498606, 97.998859, 103.826174, 110.000000, 116.540940, 123.470825,
    130.812783, 138.591315, 146.832384, 155.563492, 164.813778, 174.614116,
    184.997211, 195.997718, 207.652349, 220.000000, 233.081881, 246.941651,
    261.625565, 277.182631, 293.664768, 311.126984, 329.627557, 349.228231,
    369.994423, 391.995436, 415.304698, 440.000000, 466.163762, 493.883301,
    523.251131, 554.365262, 587.329536, 622.253967, 659.255114, 698.456463,
    739.988845, 783.990872, 830.609395, 880.000000, 932.327523, 987.766603,
    1046.502261,
];

/// The fixed, contiguous set of semitones the note model can emit (C2..=C6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitchRange;

impl PitchRange {
    /// MIDI number of the lowest supported pitch (C2)
    pub const LOW_MIDI: u8 = 36;

    /// MIDI number of the highest supported pitch (C6)
    pub const HIGH_MIDI: u8 = 84;

    /// Number of supported pitches (N)
    pub const COUNT: usize = (Self::HIGH_MIDI - Self::LOW_MIDI) as usize + 1;

    /// Number of note states (2N + 1)
    pub const STATE_COUNT: usize = 2 * Self::COUNT + 1;

    /// MIDI number for a pitch index
    pub fn midi(index: usize) -> u8 {
        debug_assert!(index < Self::COUNT);
        Self::LOW_MIDI + index as u8
    }

    /// Pitch index for a MIDI number, if it is inside the range
    pub fn index_of(midi: u8) -> Option<usize> {
        if (Self::LOW_MIDI..=Self::HIGH_MIDI).contains(&midi) {
            Some((midi - Self::LOW_MIDI) as usize)
        } else {
            None
        }
    }

    /// Table frequency in Hz for a pitch index
    pub fn frequency(index: usize) -> f64 {
        NOTE_TABLE_HZ[index]
    }

    /// Frequency of the lowest supported pitch
    pub fn lowest_frequency() -> f64 {
        NOTE_TABLE_HZ[0]
    }

    /// Frequency of the highest supported pitch
    pub fn highest_frequency() -> f64 {
        NOTE_TABLE_HZ[Self::COUNT - 1]
    }
}

/// Convert a frequency in Hz to a (fractional) MIDI number
pub fn hz_to_midi(frequency_hz: f64) -> f64 {
    12.0 * (frequency_hz / 440.0).log2() + 69.0
}

/// Scientific pitch name for a MIDI number (60 -> "C4")
pub fn note_name(midi: u8) -> String {
    let octave = (midi as i32 / 12) - 1;
    format!("{}{}", PITCH_CLASS_NAMES[(midi % 12) as usize], octave)
}

/// Hidden state of the note model
///
/// Encoded as `0` = Silence, `2k + 1` = Onset(k), `2k + 2` = Sustain(k)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteState {
    Silence,
    Onset(usize),
    Sustain(usize),
}

impl NoteState {
    /// Canonical integer encoding of this state
    pub fn index(&self) -> usize {
        match *self {
            NoteState::Silence => 0,
            NoteState::Onset(k) => 2 * k + 1,
            NoteState::Sustain(k) => 2 * k + 2,
        }
    }

    /// Decode a state from its integer encoding
    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            NoteState::Silence
        } else if index % 2 == 1 {
            NoteState::Onset((index - 1) / 2)
        } else {
            NoteState::Sustain((index - 2) / 2)
        }
    }

    /// Pitch index carried by the state, if any
    pub fn pitch_index(&self) -> Option<usize> {
        match *self {
            NoteState::Silence => None,
            NoteState::Onset(k) | NoteState::Sustain(k) => Some(k),
        }
    }
}

/// One analysis frame of the fundamental-frequency estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchFrame {
    /// Estimated fundamental frequency, `None` when no estimate exists
    pub frequency_hz: Option<f64>,

    /// Whether the estimator considers the frame voiced
    pub voiced: bool,
}

impl PitchFrame {
    /// A voiced frame at the given frequency
    pub fn voiced(frequency_hz: f64) -> Self {
        PitchFrame {
            frequency_hz: Some(frequency_hz),
            voiced: true,
        }
    }

    /// An unvoiced frame with no frequency estimate
    pub fn unvoiced() -> Self {
        PitchFrame {
            frequency_hz: None,
            voiced: false,
        }
    }
}

/// Per-frame pitch track for a whole clip, plus its global tuning deviation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PitchContour {
    /// One frame per hop, covering the whole clip
    pub frames: Vec<PitchFrame>,

    /// Aggregate deviation from exact semitones, in fractions of a semitone
    pub tuning_offset: f64,
}

impl PitchContour {
    /// Build a contour from frames with zero tuning offset
    pub fn new(frames: Vec<PitchFrame>) -> Self {
        PitchContour {
            frames,
            tuning_offset: 0.0,
        }
    }

    /// Number of analysis frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frequencies with unvoiced or non-finite frames mapped to 0 Hz
    pub fn frequencies_or_zero(&self) -> Vec<f64> {
        self.frames
            .iter()
            .map(|frame| match frame.frequency_hz {
                Some(f) if f.is_finite() && f > 0.0 => f,
                _ => 0.0,
            })
            .collect()
    }
}

/// A discrete transcribed note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Onset time in seconds from the start of the clip
    pub onset_secs: f64,

    /// Offset time in seconds (always greater than the onset)
    pub offset_secs: f64,

    /// MIDI note number
    pub pitch: u8,

    /// MIDI velocity [0, 127] derived from the note's loudness
    pub velocity: u8,
}

impl Note {
    /// Note length in seconds
    pub fn duration_secs(&self) -> f64 {
        self.offset_secs - self.onset_secs
    }

    /// Index of the note's pitch inside the supported range
    pub fn pitch_index(&self) -> Option<usize> {
        PitchRange::index_of(self.pitch)
    }

    /// Scientific pitch name, e.g. "A4"
    pub fn name(&self) -> String {
        note_name(self.pitch)
    }
}
