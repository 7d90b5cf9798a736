//! Text filter primitives.
//!
//! Everything here is pure. Matching is case-insensitive; masking replaces
//! only the matched characters with `#` and leaves the rest of the text as sent.

use lobby_settings::BadWords;

/// Keep only letters.
pub fn letter_projection(text: &str) -> String {
    text.chars().filter(|c| c.is_alphabetic()).collect()
}

/// Percentage of equal characters at equal positions, over the shorter length.
/// Zero when either side is empty.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let shorter = a.len().min(b.len());
    if shorter == 0 {
        return 0.0;
    }
    let matches = a.iter().zip(&b).filter(|(x, y)| x == y).count();
    matches as f64 / shorter as f64 * 100.0
}

/// Uppercase letters as a percentage of all letters. Zero when there are none.
pub fn cap_percent(text: &str) -> f64 {
    let letters = letter_projection(text);
    let total = letters.chars().count();
    if total == 0 {
        return 0.0;
    }
    let upper = letters.chars().filter(|c| c.is_uppercase()).count();
    upper as f64 / total as f64 * 100.0
}

/// Neutralize markup.
pub fn escape_markup(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

/// How many listed words occur anywhere in the lower-cased letters of `text`.
pub fn count_contained(text: &str, words: &BadWords) -> u32 {
    let letters = letter_projection(text).to_lowercase();
    words.iter().filter(|word| letters.contains(*word)).count() as u32
}

/// Mask space-separated tokens that equal a listed word. Returns the text and
/// the number of tokens masked.
pub fn mask_tokens(text: &str, words: &BadWords) -> (String, u32) {
    let mut masked = 0;
    let out: Vec<String> = text
        .split(' ')
        .map(|token| {
            let lower = token.to_lowercase();
            if words.iter().any(|word| word == lower) {
                masked += 1;
                "#".repeat(token.chars().count())
            } else {
                token.to_string()
            }
        })
        .collect();
    (out.join(" "), masked)
}

/// Mask listed words found in the letters of `text`, ignoring anything between
/// letters. `d u c k` and `ducking` both match `duck`. Returns the text and the
/// number of occurrences masked.
pub fn mask_letters(text: &str, words: &BadWords) -> (String, u32) {
    let chars: Vec<char> = text.chars().collect();

    // (index into `chars`, lower-cased letter)
    let mut projection: Vec<(usize, char)> = Vec::new();
    for (idx, c) in chars.iter().enumerate() {
        if c.is_alphabetic() {
            projection.extend(c.to_lowercase().map(|lc| (idx, lc)));
        }
    }

    let mut mask = vec![false; chars.len()];
    let mut masked = 0;
    for word in words.iter() {
        let word: Vec<char> = word.chars().collect();
        if word.is_empty() || word.len() > projection.len() {
            continue;
        }
        let mut start = 0;
        while start + word.len() <= projection.len() {
            let window = &projection[start..start + word.len()];
            if window.iter().map(|(_, c)| c).eq(word.iter()) {
                for (idx, _) in window {
                    mask[*idx] = true;
                }
                masked += 1;
                start += word.len();
            } else {
                start += 1;
            }
        }
    }

    let out: String = chars
        .iter()
        .zip(&mask)
        .map(|(c, hit)| if *hit { '#' } else { *c })
        .collect();
    (out, masked)
}

/// True if any space-separated token, at least as long as a listed word,
/// matches that word by at least `tolerance` percent.
pub fn resembles_any(text: &str, words: &BadWords, tolerance: u32) -> bool {
    let lower = text.to_lowercase();
    lower.split(' ').any(|token| {
        let token_len = token.chars().count();
        let letters = letter_projection(token);
        words.iter().any(|word| {
            token_len >= word.chars().count() && similarity(word, &letters) >= f64::from(tolerance)
        })
    })
}
