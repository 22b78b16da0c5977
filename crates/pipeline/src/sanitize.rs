//! Reply cleanup.
//!
//! Models often keep going past their own turn and invent the next line of
//! dialogue. Everything from the first role marker onward is cut.

/// Role markers, checked in this order against the progressively cut text.
pub const MARKERS: [&str; 2] = ["User:", "Assistant:"];

/// Cut `raw` at the first role marker and trim surrounding whitespace.
pub fn sanitize(raw: &str) -> String {
    let mut text = raw;
    for marker in MARKERS {
        if let Some(pos) = text.find(marker) {
            text = text[..pos].trim();
        }
    }
    text.trim().to_string()
}
