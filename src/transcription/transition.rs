// Note-state transition model
// Silence / Onset(k) / Sustain(k) topology with sparse predecessor lists

use crate::transcription::types::{NoteState, PitchRange};

/// Row-stochastic transition matrix over the 2N + 1 note states
///
/// Stored densely (row = from, column = to) and as a compressed column
/// index so the decoder only visits non-zero transitions.
#[derive(Debug, Clone)]
pub struct TransitionMatrix {
    n_states: usize,

    /// Dense row-major probabilities, `n_states * n_states`
    probabilities: Vec<f64>,

    /// `pointers[s]..pointers[s + 1]` indexes the predecessors of state `s`
    pointers: Vec<usize>,

    /// Predecessor states, ascending within each target state
    predecessors: Vec<usize>,

    /// ln(probability) for each predecessor entry
    log_probabilities: Vec<f64>,
}

impl TransitionMatrix {
    /// Build the note-model transition matrix
    ///
    /// - Silence stays with `p_stay_silence`, otherwise moves uniformly to any onset
    /// - Onset(k) always moves to Sustain(k)
    /// - Sustain(k) stays with `p_stay_note`; the rest is split evenly between
    ///   Silence and every Onset(j), so retriggering the same pitch is possible
    pub fn build(p_stay_note: f64, p_stay_silence: f64) -> Self {
        let n_notes = PitchRange::COUNT;
        let n_states = PitchRange::STATE_COUNT;
        let mut probabilities = vec![0.0; n_states * n_states];

        let p_leave_silence = (1.0 - p_stay_silence) / n_notes as f64;
        let p_leave_note = (1.0 - p_stay_note) / (n_notes + 1) as f64;

        let silence = NoteState::Silence.index();
        probabilities[silence * n_states + silence] = p_stay_silence;
        for k in 0..n_notes {
            probabilities[silence * n_states + NoteState::Onset(k).index()] = p_leave_silence;
        }

        for k in 0..n_notes {
            let onset = NoteState::Onset(k).index();
            let sustain = NoteState::Sustain(k).index();

            probabilities[onset * n_states + sustain] = 1.0;

            probabilities[sustain * n_states + silence] = p_leave_note;
            probabilities[sustain * n_states + sustain] = p_stay_note;
            for j in 0..n_notes {
                probabilities[sustain * n_states + NoteState::Onset(j).index()] = p_leave_note;
            }
        }

        Self::from_dense(n_states, probabilities)
    }

    /// Index the non-zero entries of a dense matrix by target state
    fn from_dense(n_states: usize, probabilities: Vec<f64>) -> Self {
        let mut pointers = Vec::with_capacity(n_states + 1);
        let mut predecessors = Vec::new();
        let mut log_probabilities = Vec::new();

        pointers.push(0);
        for to in 0..n_states {
            for from in 0..n_states {
                let p = probabilities[from * n_states + to];
                if p > 0.0 {
                    predecessors.push(from);
                    log_probabilities.push(p.ln());
                }
            }
            pointers.push(predecessors.len());
        }

        TransitionMatrix {
            n_states,
            probabilities,
            pointers,
            predecessors,
            log_probabilities,
        }
    }

    /// Number of states (rows and columns)
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Transition probability from one state to another
    pub fn probability(&self, from: NoteState, to: NoteState) -> f64 {
        self.probabilities[from.index() * self.n_states + to.index()]
    }

    /// Full outgoing row of a state
    pub fn row(&self, from: usize) -> &[f64] {
        &self.probabilities[from * self.n_states..(from + 1) * self.n_states]
    }

    /// Predecessors of a state with their log transition probabilities,
    /// in ascending predecessor order
    pub fn predecessors(&self, to: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.pointers[to]..self.pointers[to + 1];
        self.predecessors[range.clone()]
            .iter()
            .copied()
            .zip(self.log_probabilities[range].iter().copied())
    }

    /// Number of non-zero transitions
    pub fn nonzero_count(&self) -> usize {
        self.predecessors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonzero_in_row(matrix: &TransitionMatrix, from: usize) -> usize {
        matrix.row(from).iter().filter(|&&p| p != 0.0).count()
    }

    #[test]
    fn test_rows_sum_to_one() {
        for &(p_note, p_silence) in &[(0.9, 0.7), (0.5, 0.5), (0.01, 0.99), (0.999, 0.001)] {
            let matrix = TransitionMatrix::build(p_note, p_silence);
            for from in 0..matrix.n_states() {
                let sum: f64 = matrix.row(from).iter().sum();
                assert!((sum - 1.0).abs() < 1e-9, "row {} sums to {}", from, sum);
            }
        }
    }

    #[test]
    fn test_silence_row_topology() {
        let matrix = TransitionMatrix::build(0.9, 0.7);

        assert_eq!(nonzero_in_row(&matrix, 0), 1 + PitchRange::COUNT);
        assert!((matrix.probability(NoteState::Silence, NoteState::Silence) - 0.7).abs() < 1e-12);

        let expected = 0.3 / PitchRange::COUNT as f64;
        for k in 0..PitchRange::COUNT {
            assert!((matrix.probability(NoteState::Silence, NoteState::Onset(k)) - expected).abs() < 1e-12);
            assert_eq!(matrix.probability(NoteState::Silence, NoteState::Sustain(k)), 0.0);
        }
    }

    #[test]
    fn test_onset_rows_are_deterministic() {
        let matrix = TransitionMatrix::build(0.9, 0.7);

        for k in 0..PitchRange::COUNT {
            let onset = NoteState::Onset(k);
            assert_eq!(nonzero_in_row(&matrix, onset.index()), 1);
            assert_eq!(matrix.probability(onset, NoteState::Sustain(k)), 1.0);
        }
    }

    #[test]
    fn test_sustain_row_topology() {
        let matrix = TransitionMatrix::build(0.9, 0.7);
        let leave = 0.1 / (PitchRange::COUNT + 1) as f64;

        let sustain = NoteState::Sustain(10);
        assert_eq!(nonzero_in_row(&matrix, sustain.index()), PitchRange::COUNT + 2);
        assert!((matrix.probability(sustain, sustain) - 0.9).abs() < 1e-12);
        assert!((matrix.probability(sustain, NoteState::Silence) - leave).abs() < 1e-12);
        assert!((matrix.probability(sustain, NoteState::Onset(10)) - leave).abs() < 1e-12);
        assert!((matrix.probability(sustain, NoteState::Onset(3)) - leave).abs() < 1e-12);
        assert_eq!(matrix.probability(sustain, NoteState::Sustain(11)), 0.0);
    }

    #[test]
    fn test_predecessor_index_matches_dense() {
        let matrix = TransitionMatrix::build(0.9, 0.7);
        let n = matrix.n_states();

        let mut total = 0;
        for to in 0..n {
            let mut last = None;
            for (from, log_p) in matrix.predecessors(to) {
                let p = matrix.row(from)[to];
                assert!(p > 0.0);
                assert!((log_p - p.ln()).abs() < 1e-12);
                // Ascending order keeps the lowest-state tie-break
                if let Some(prev) = last {
                    assert!(from > prev);
                }
                last = Some(from);
                total += 1;
            }
        }

        assert_eq!(total, matrix.nonzero_count());

        // Sustain(k) is reachable only from Onset(k) and itself
        let preds: Vec<usize> = matrix.predecessors(NoteState::Sustain(5).index()).map(|(s, _)| s).collect();
        assert_eq!(preds, vec![NoteState::Onset(5).index(), NoteState::Sustain(5).index()]);
    }
}
