//! Extraction of the JSON array a model was asked to answer with.
//!
//! Models wrap their answer in prose or code fences and long batches get
//! truncated mid-object. The array is parsed strictly first; when that fails
//! every complete top-level object up to the first broken one is kept.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArray {
    pub items: Vec<Value>,
    /// True when the strict parse failed and `items` came from recovery.
    pub recovered: bool,
}

/// Slice from the first `[` to the last `]`, if both exist in that order.
pub fn locate_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse the model's array answer; `None` when there is no array to read.
///
/// Brackets in a prose preamble ("[2 items]") are passed over: after the
/// first `[`, only a `[` that opens an object list is tried as the start.
pub fn parse_array(raw: &str) -> Option<ParsedArray> {
    if let Some(Ok(items)) = locate_array(raw).map(serde_json::from_str::<Vec<Value>>) {
        return Some(ParsedArray {
            items,
            recovered: false,
        });
    }

    let starts = object_list_starts(raw);
    if let Some(end) = raw.rfind(']') {
        for &start in starts.iter().filter(|&&start| start < end) {
            if let Ok(items) = serde_json::from_str::<Vec<Value>>(&raw[start..=end]) {
                return Some(ParsedArray {
                    items,
                    recovered: false,
                });
            }
        }
    }

    let start = match starts.first() {
        Some(&start) => start,
        None => raw.find('[')?,
    };
    Some(ParsedArray {
        items: recover_objects(&raw[start + 1..]),
        recovered: true,
    })
}

/// Positions of every `[` whose next non-whitespace character is `{`.
fn object_list_starts(raw: &str) -> Vec<usize> {
    raw.match_indices('[')
        .map(|(i, _)| i)
        .filter(|&i| raw[i + 1..].trim_start().starts_with('{'))
        .collect()
}

/// Collect complete top-level objects from the body of an array.
fn recover_objects(body: &str) -> Vec<Value> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut object_start = 0usize;

    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' | '[' => {
                if depth == 0 {
                    if c == '[' {
                        break;
                    }
                    object_start = i;
                }
                depth += 1;
            }
            '}' | ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    match serde_json::from_str::<Value>(&body[object_start..=i]) {
                        Ok(value) => items.push(value),
                        Err(_) => break,
                    }
                }
            }
            ']' => break,
            ',' => {}
            c if c.is_whitespace() => {}
            _ if depth == 0 => break,
            _ => {}
        }
    }
    items
}

/// Backlog id of an answer item; models sometimes quote numbers.
pub fn item_id(item: &Value) -> Option<i64> {
    match item.get("id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
