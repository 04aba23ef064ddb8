//! Stable text rendering of snapshot values.
//!
//! Values are rendered in an inspect-like notation that is easy to read in a
//! diff: object keys are sorted, strings are single quoted and short
//! containers stay on one line.
//!
//! ```text
//! { a: 1, list: [ 1, 2, 3 ], name: 'nestrun', 'not an ident': null }
//! ```

use serde_json::Value;

/// Containers whose single line form is longer than this are broken up.
const BREAK_LENGTH: usize = 80;

const INDENT: &str = "  ";

/// Render a JSON value.
pub fn serialize(value: &Value) -> String {
    render(value, 0)
}

fn render(value: &Value, depth: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let entries: Vec<_> = items.iter().map(|item| render(item, depth + 1)).collect();
            container("[", "]", entries, depth)
        }
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let entries = keys
                .into_iter()
                .map(|key| format!("{}: {}", render_key(key), render(&map[key], depth + 1)))
                .collect();
            container("{", "}", entries, depth)
        }
    }
}

fn container(open: &str, close: &str, entries: Vec<String>, depth: usize) -> String {
    if entries.is_empty() {
        return format!("{open}{close}");
    }

    let single = format!("{open} {} {close}", entries.join(", "));
    let fits = depth * INDENT.len() + single.len() <= BREAK_LENGTH;
    if fits && !single.contains('\n') {
        return single;
    }

    let inner = INDENT.repeat(depth + 1);
    let outer = INDENT.repeat(depth);
    let body: Vec<_> = entries
        .into_iter()
        .map(|entry| format!("{inner}{entry}"))
        .collect();
    format!("{open}\n{}\n{outer}{close}", body.join(",\n"))
}

fn render_key(key: &str) -> String {
    match is_identifier(key) {
        true => key.to_string(),
        false => quote(key),
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn quote(s: &str) -> String {
    let quote = match (s.contains('\''), s.contains('"'), s.contains('`')) {
        (false, _, _) => '\'',
        (true, false, _) => '"',
        (true, true, false) => '`',
        (true, true, true) => '\'',
    };

    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}
