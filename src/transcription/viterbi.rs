// Viterbi decoding
// Exact maximum-likelihood note-state path over the sparse transition model

use crate::transcription::emission::EmissionPotentials;
use crate::transcription::engine::TranscriptionError;
use crate::transcription::transition::TransitionMatrix;
use crate::transcription::types::NoteState;

/// Decode the most likely state sequence
///
/// Works in the log domain with the initial distribution concentrated on
/// Silence. Uses one `states x frames` backpointer arena and two rolling
/// score rows; only non-zero transitions are visited. Ties resolve to the
/// lowest-numbered state.
pub fn decode(
    transitions: &TransitionMatrix,
    emissions: &EmissionPotentials,
) -> Result<Vec<NoteState>, TranscriptionError> {
    let n_states = transitions.n_states();
    let n_frames = emissions.n_frames();

    if emissions.n_states() != n_states {
        return Err(TranscriptionError::DimensionMismatch {
            transition_states: n_states,
            emission_states: emissions.n_states(),
        });
    }

    if n_frames == 0 {
        return Ok(Vec::new());
    }

    let mut previous = vec![f64::NEG_INFINITY; n_states];
    let mut current = vec![f64::NEG_INFINITY; n_states];
    let mut backpointers = vec![0u32; n_states * n_frames];

    // Initial frame: all probability mass on Silence
    let silence = NoteState::Silence.index();
    previous[silence] = log_or_neg_inf(emissions.get(silence, 0));

    for frame in 1..n_frames {
        let densities = emissions.frame(frame);
        let offset = frame * n_states;

        for state in 0..n_states {
            let mut best = f64::NEG_INFINITY;
            let mut best_prev = 0usize;

            for (prev_state, log_trans) in transitions.predecessors(state) {
                let score = previous[prev_state] + log_trans;
                if score > best {
                    best = score;
                    best_prev = prev_state;
                }
            }

            current[state] = best + log_or_neg_inf(densities[state]);
            backpointers[offset + state] = best_prev as u32;
        }

        std::mem::swap(&mut previous, &mut current);
    }

    let mut state = 0usize;
    let mut best_log = f64::NEG_INFINITY;
    for (s, &score) in previous.iter().enumerate() {
        if score > best_log {
            best_log = score;
            state = s;
        }
    }

    if best_log == f64::NEG_INFINITY {
        log::warn!("Every decoded path has zero probability; falling back to the lowest state");
    }

    let mut path = vec![NoteState::Silence; n_frames];
    for frame in (0..n_frames).rev() {
        path[frame] = NoteState::from_index(state);
        state = backpointers[frame * n_states + state] as usize;
    }

    Ok(path)
}

fn log_or_neg_inf(v: f64) -> f64 {
    if v <= 0.0 {
        f64::NEG_INFINITY
    } else {
        v.ln()
    }
}
