/// Normalize a room slug: lowercase, every character outside `a-z0-9-`
/// stripped. May produce an empty string, which callers reject as invalid.
pub fn normalize(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}
