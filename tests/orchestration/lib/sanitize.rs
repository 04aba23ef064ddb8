use std::sync::LazyLock;

use regex::Regex;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: 830ms, 1s, 1.5s, 2m 3.4s
    Regex::new(r"\b(?:\d+m )?\d+(?:\.\d+)?(?:ms|s|m)\b").unwrap()
});

/// Replace every rendered duration with `<duration>`.
pub fn sanitize_durations(input: &str) -> String {
    DURATION_RE.replace_all(input, "<duration>").to_string()
}
