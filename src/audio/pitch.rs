//! Pitch-name parsing (`C4`, `Bb2`, `F#3`).

/// MIDI number of a scientific pitch name, or `None` if it does not parse.
///
/// `C4` is 60. Accidentals `#` and `b` may be stacked once.
pub fn midi_number(note: &str) -> Option<i32> {
    let mut chars = note.chars();
    let letter = chars.next()?;
    let base = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest),
    };

    let octave: i32 = octave.parse().ok()?;
    let midi = (octave + 1) * 12 + base + accidental;
    (0..=127).contains(&midi).then_some(midi)
}

/// Equal-tempered frequency in Hz (A4 = 440).
pub fn frequency(note: &str) -> Option<f64> {
    midi_number(note).map(|midi| 440.0 * 2f64.powf((midi - 69) as f64 / 12.0))
}

/// Root of a chord symbol: its letter plus an optional `b`/`#`.
///
/// `"Bbmaj7"` → `"Bb"`, `"C#m7b5"` → `"C#"`, `"G7"` → `"G"`.
pub fn chord_root(label: &str) -> Option<&str> {
    let first = label.chars().next()?;
    if !matches!(first.to_ascii_uppercase(), 'A'..='G') {
        return None;
    }
    match label[1..].chars().next() {
        Some('b') | Some('#') => Some(&label[..2]),
        _ => Some(&label[..1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_naturals_and_accidentals() {
        assert_eq!(midi_number("C4"), Some(60));
        assert_eq!(midi_number("A4"), Some(69));
        assert_eq!(midi_number("Bb2"), Some(46));
        assert_eq!(midi_number("F#3"), Some(54));
        assert_eq!(midi_number("C-1"), Some(0));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(midi_number(""), None);
        assert_eq!(midi_number("H2"), None);
        assert_eq!(midi_number("C"), None);
        assert_eq!(midi_number("C99"), None);
    }

    #[test]
    fn frequency_of_a4() {
        assert_eq!(frequency("A4"), Some(440.0));
        let c4 = frequency("C4").unwrap();
        assert!((c4 - 261.6256).abs() < 1e-3);
    }

    #[test]
    fn extracts_chord_roots() {
        assert_eq!(chord_root("Bbmaj7"), Some("Bb"));
        assert_eq!(chord_root("C#m7b5"), Some("C#"));
        assert_eq!(chord_root("G7"), Some("G"));
        assert_eq!(chord_root("Dm"), Some("D"));
        assert_eq!(chord_root("x"), None);
    }
}
