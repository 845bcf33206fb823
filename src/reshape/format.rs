// src/reshape/format.rs

/// Replace `_` with spaces, collapse whitespace, and capitalise every word of
/// three or more characters. Shorter words are left untouched, so
/// `reunioes_do_time` becomes `Reunioes do Time`.
pub fn format_label(raw: &str) -> String {
    raw.replace('_', " ")
        .split_whitespace()
        .map(|word| {
            if word.chars().count() >= 3 {
                capitalize(word)
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// First character upper-cased, the rest lower-cased.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
