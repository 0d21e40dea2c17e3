//! Best-path (greedy) CTC decoding.
//!
//! Pure functions from per-frame class probabilities to text. No I/O, no
//! state: decoding the same matrix twice yields the same string.
//!
//! The collapse rule compares each frame's argmax to the *immediately
//! preceding raw* argmax, not to the last kept symbol. A frame is dropped
//! when it repeats its raw neighbor, and independently when it is the blank.
//! Collapsing repeats only among kept symbols would merge characters that
//! are legitimately separated by a blank (e.g. "ll" in "appelle").

use crate::alphabet::{ALPHABET, BLANK_INDEX, UNKNOWN_INDEX};
use ndarray::{Array3, ArrayView2};

/// Separator between independently decoded rows of one batch.
pub const BATCH_SEPARATOR: &str = ", ";

/// Argmax with ties broken by the lowest index (first occurrence of the
/// maximum). `Iterator::max_by` keeps the last maximum, which is not what
/// the training-side decoder does.
fn argmax(frame: &[f32]) -> usize {
    let mut best = 0;
    for (i, &score) in frame.iter().enumerate().skip(1) {
        if score > frame[best] {
            best = i;
        }
    }
    best
}

/// Decodes one probability matrix `[frames, classes]` against an arbitrary
/// alphabet with `blank` as the CTC blank index.
///
/// An empty matrix decodes to an empty string. Never fails for well-formed
/// input: indices outside the alphabet map to the unknown symbol.
pub fn best_path_decode_with(
    probabilities: ArrayView2<'_, f32>,
    alphabet: &[char],
    blank: usize,
) -> String {
    let mut out = String::new();
    let mut previous: Option<usize> = None;

    for frame in probabilities.outer_iter() {
        if frame.is_empty() {
            continue;
        }
        let idx = match frame.as_slice() {
            Some(slice) => argmax(slice),
            None => argmax(&frame.iter().copied().collect::<Vec<f32>>()),
        };
        if previous != Some(idx) && idx != blank {
            out.push(
                alphabet
                    .get(idx)
                    .copied()
                    .unwrap_or(ALPHABET[UNKNOWN_INDEX]),
            );
        }
        previous = Some(idx);
    }

    out
}

/// Decodes one probability matrix against the model's fixed alphabet.
pub fn best_path_decode(probabilities: ArrayView2<'_, f32>) -> String {
    best_path_decode_with(probabilities, &ALPHABET, BLANK_INDEX)
}

/// Decodes every row of a `[batch, frames, classes]` tensor independently.
pub fn decode_batch(predictions: &Array3<f32>) -> Vec<String> {
    (0..predictions.shape()[0])
        .map(|b| best_path_decode(predictions.index_axis(ndarray::Axis(0), b)))
        .collect()
}

/// Decodes a batch and joins the rows with the outer-API separator.
pub fn decode_batch_joined(predictions: &Array3<f32>) -> String {
    decode_batch(predictions).join(BATCH_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Builds a `[frames, classes]` matrix whose argmax sequence is `indices`.
    fn matrix_for(indices: &[usize], classes: usize) -> Array2<f32> {
        let mut m = Array2::<f32>::zeros((indices.len(), classes));
        for (t, &idx) in indices.iter().enumerate() {
            m[[t, idx]] = 1.0;
        }
        m
    }

    #[test]
    fn collapses_raw_neighbors_then_blanks() {
        // Reference case: alphabet [blank, 'a', 'b'], raw argmaxes
        // [1,1,0,2,2,2,1] -> repeats against raw neighbor collapse to
        // [1,0,2,1] -> blank dropped -> "aba".
        let m = matrix_for(&[1, 1, 0, 2, 2, 2, 1], 3);
        let decoded = best_path_decode_with(m.view(), &['\0', 'a', 'b'], 0);
        assert_eq!(decoded, "aba");
    }

    #[test]
    fn repeat_separated_by_blank_survives() {
        // Same class twice with a blank frame between, as in "ll".
        let m = matrix_for(&[1, 0, 1], 3);
        let decoded = best_path_decode_with(m.view(), &['\0', 'l', 'x'], 0);
        assert_eq!(decoded, "ll");
    }

    #[test]
    fn all_non_blank_sequence_ignores_blank_presence() {
        // Removing the blank from the alphabet must not change the decode of
        // a sequence that never emits it.
        let m = matrix_for(&[1, 2, 1], 3);
        let with_blank = best_path_decode_with(m.view(), &['\0', 'a', 'b'], 0);
        let no_blank = best_path_decode_with(m.view(), &['?', 'a', 'b'], usize::MAX);
        assert_eq!(with_blank, no_blank);
        assert_eq!(with_blank, "aba");
    }

    #[test]
    fn empty_matrix_decodes_to_empty_string() {
        let m = Array2::<f32>::zeros((0, 108));
        assert_eq!(best_path_decode(m.view()), "");
    }

    #[test]
    fn decoding_is_idempotent() {
        let m = matrix_for(&[5, 5, 0, 9, 0, 9], 108);
        assert_eq!(best_path_decode(m.view()), best_path_decode(m.view()));
    }

    #[test]
    fn argmax_ties_break_on_first_occurrence() {
        // Classes 2 and 4 share the maximum: class 2 must win.
        let mut m = Array2::<f32>::zeros((1, 6));
        m[[0, 2]] = 0.5;
        m[[0, 4]] = 0.5;
        let decoded = best_path_decode_with(m.view(), &['\0', 'a', 'b', 'c', 'd', 'e'], 0);
        assert_eq!(decoded, "b");
    }

    #[test]
    fn decoded_length_never_exceeds_frame_count() {
        let seqs: &[&[usize]] = &[
            &[1, 2, 3, 4, 5],
            &[0, 0, 0],
            &[7, 7, 7, 7],
            &[1, 0, 1, 0, 1],
            &[],
        ];
        for seq in seqs {
            let m = matrix_for(seq, 108);
            let decoded = best_path_decode(m.view());
            assert!(decoded.chars().count() <= seq.len());
        }
    }

    #[test]
    fn out_of_range_index_maps_to_unknown() {
        let m = matrix_for(&[2], 3);
        let decoded = best_path_decode_with(m.view(), &['\0', 'a'], 0);
        assert_eq!(decoded, "\u{FFFD}");
    }

    #[test]
    fn batch_rows_decode_independently() {
        let mut t = Array3::<f32>::zeros((2, 2, 108));
        let zero = ALPHABET.iter().position(|&c| c == '0').unwrap();
        t[[0, 0, zero]] = 1.0;
        t[[0, 1, 0]] = 1.0;
        t[[1, 0, 0]] = 1.0;
        t[[1, 1, 0]] = 1.0;
        let decoded = decode_batch(&t);
        assert_eq!(decoded, vec!["0".to_string(), String::new()]);
        assert_eq!(decode_batch_joined(&t), "0, ");
    }
}
