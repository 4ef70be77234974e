//! Short, human-memorable entity identifiers.
//!
//! A base id is two initials, the two-digit day of the join date and a month
//! letter: "Alice Brown" joining on 12 March is `AB12C`. When the base is
//! taken, candidates append random digits while staying within 7 characters.

use chrono::{Datelike, NaiveDate};
use rand::Rng;

/// Attempts with two appended digits before switching to three.
const TWO_DIGIT_ATTEMPTS: usize = 30;
/// Attempts with three appended digits before giving up.
const THREE_DIGIT_ATTEMPTS: usize = 60;

/// Build the 5-character base id for a name and join date.
pub fn base_id(name: &str, joined: NaiveDate) -> String {
    let words: Vec<Vec<char>> = name
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_uppercase())
                .collect::<Vec<_>>()
        })
        .filter(|w| !w.is_empty())
        .collect();

    let first = words.first().and_then(|w| w.first()).copied().unwrap_or('X');
    let second = if words.len() > 1 {
        words.last().and_then(|w| w.first()).copied()
    } else {
        words.first().and_then(|w| w.get(1)).copied()
    }
    .unwrap_or('X');

    let month = (b'A' + (joined.month0() as u8)) as char;
    format!("{first}{second}{:02}{month}", joined.day())
}

/// Whether `s` looks like an entity id (5-7 ASCII alphanumerics).
pub fn is_valid_id(s: &str) -> bool {
    (5..=7).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Normalize user-typed id input.
pub fn normalize_id(s: &str) -> String {
    s.trim().to_ascii_uppercase()
}

/// Candidate ids in the order they should be tried: the base, then the base
/// plus two random digits, then its first four chars plus three random digits.
pub fn candidates<R: Rng>(base: &str, rng: &mut R) -> Vec<String> {
    let mut out = Vec::with_capacity(1 + TWO_DIGIT_ATTEMPTS + THREE_DIGIT_ATTEMPTS);
    out.push(base.to_string());
    for _ in 0..TWO_DIGIT_ATTEMPTS {
        out.push(format!("{base}{:02}", rng.gen_range(0..100)));
    }
    let short: String = base.chars().take(4).collect();
    for _ in 0..THREE_DIGIT_ATTEMPTS {
        out.push(format!("{short}{:03}", rng.gen_range(0..1000)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_base_id_two_words() {
        assert_eq!(base_id("Alice Brown", date(2026, 3, 12)), "AB12C");
    }

    #[test]
    fn test_base_id_single_word_and_padding() {
        assert_eq!(base_id("Bo", date(2026, 1, 5)), "BO05A");
        assert_eq!(base_id("Z", date(2026, 12, 31)), "ZX31L");
        assert_eq!(base_id("", date(2026, 6, 1)), "XX01F");
    }

    #[test]
    fn test_base_id_ignores_punctuation_and_case() {
        assert_eq!(base_id("  jean-luc  o'neil ", date(2026, 10, 9)), "JO09J");
    }

    #[test]
    fn test_candidates_stay_within_length_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let all = candidates("AB12C", &mut rng);
        assert_eq!(all[0], "AB12C");
        assert!(all.iter().all(|c| is_valid_id(c)));
        assert!(all[1].starts_with("AB12C") && all[1].len() == 7);
        assert!(all.last().unwrap().starts_with("AB12") && all.last().unwrap().len() == 7);
    }

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id("AB12C"));
        assert!(is_valid_id("AB12C07"));
        assert!(!is_valid_id("AB1"));
        assert!(!is_valid_id("AB12C-7"));
        assert_eq!(normalize_id(" ab12c "), "AB12C");
    }
}
