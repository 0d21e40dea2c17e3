//! Character alphabet for the handwriting recognition model.
//!
//! The alphabet is a versioned constant shared between training and
//! inference, never configuration. Index 0 is the CTC blank symbol and the
//! last index is the unknown catch-all; both are reserved and never appear in
//! decoded text (blanks are dropped, unknown maps to U+FFFD).

/// Alphabet revision tag. Must match the model artifact it was trained with.
pub const ALPHABET_VERSION: &str = "mlt-rimes-v3";

/// Index of the CTC blank symbol.
pub const BLANK_INDEX: usize = 0;

/// Index of the unknown catch-all symbol.
pub const UNKNOWN_INDEX: usize = ALPHABET.len() - 1;

/// The fixed, ordered symbol set (108 entries). The blank is rendered as NUL
/// and the unknown catch-all as the replacement character so that neither can
/// collide with a real glyph.
pub const ALPHABET: [char; 108] = [
    '\0', // blank
    ' ', '!', '"', '#', '$', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', //
    ':', ';', '<', '=', '>', '?', '@', //
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', //
    '_', //
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 't', 'u', 'v', 'w', 'x', 'y', 'z', //
    '{', '}', '¤', '°', '²', //
    'À', 'É', 'à', 'â', 'ç', 'è', 'é', 'ê', 'ë', 'î', 'ô', 'ù', 'û', 'œ', '€', //
    '\u{FFFD}', // unknown catch-all
];

/// Number of symbols, equal to the model's output class count.
pub const ALPHABET_SIZE: usize = ALPHABET.len();

/// Maps a class index to its glyph. Out-of-range indices fall back to the
/// unknown symbol rather than panicking; the model output dimension is
/// validated upstream so this only fires on malformed test inputs.
pub fn char_at(index: usize) -> char {
    ALPHABET.get(index).copied().unwrap_or(ALPHABET[UNKNOWN_INDEX])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_fixed_size() {
        assert_eq!(ALPHABET_SIZE, 108);
        assert_eq!(BLANK_INDEX, 0);
        assert_eq!(UNKNOWN_INDEX, 107);
    }

    #[test]
    fn blank_and_unknown_are_reserved() {
        assert_eq!(ALPHABET[BLANK_INDEX], '\0');
        assert_eq!(ALPHABET[UNKNOWN_INDEX], '\u{FFFD}');
        // No real glyph may reuse the reserved code points.
        for (i, c) in ALPHABET.iter().enumerate() {
            if i != BLANK_INDEX && i != UNKNOWN_INDEX {
                assert_ne!(*c, '\0');
                assert_ne!(*c, '\u{FFFD}');
            }
        }
    }

    #[test]
    fn no_duplicate_symbols() {
        let mut seen = std::collections::HashSet::new();
        for c in ALPHABET {
            assert!(seen.insert(c), "duplicate symbol {c:?}");
        }
    }

    #[test]
    fn out_of_range_maps_to_unknown() {
        assert_eq!(char_at(2000), '\u{FFFD}');
        assert_eq!(char_at(1), ' ');
    }
}
