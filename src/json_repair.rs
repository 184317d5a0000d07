//! Recovers a JSON object from chatty model output.
//!
//! Models asked for "JSON only" still wrap the object in markdown fences,
//! add a sentence before or after it, or leave trailing commas behind.
//! [`repair_json`] undoes those three habits and nothing else: string
//! contents are never rewritten.

/// Normalizes `text` into a string that should parse as a single JSON object.
///
/// Steps, in order: drop code-fence markers at line starts, slice from the first `{` to its
/// matching `}`, remove trailing commas before `}` / `]`. When no balanced
/// object exists the text from the first `{` onward is returned unchanged so
/// the parse error points at the real problem.
pub fn repair_json(text: &str) -> String {
    let unfenced = strip_code_fences(text);
    let Some(start) = unfenced.find('{') else {
        return unfenced.trim().to_owned();
    };

    let object = &unfenced[start..];
    let object = match matching_brace_end(object) {
        Some(end) => &object[..=end],
        None => object,
    };

    remove_trailing_commas(object)
}

/// Naive first-`{` to last-`}` slice, used when [`repair_json`] output still
/// fails to parse.
pub fn extract_outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Drops fence lines. A fence only counts at the start of a line; JSON
/// strings cannot hold a raw newline, so backticks inside them are kept.
fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let Some(after) = line.trim_start().strip_prefix("```") else {
            out.push_str(line);
            continue;
        };
        // Language tag directly after the fence (```json, ```JSON, ...).
        let tag_len = after
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(after.len());
        out.push_str(&after[tag_len..]);
    }
    out
}

/// Byte offset of the `}` closing the object that starts at `text[0]`.
fn matching_brace_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }

    None
}

fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(ch);
            continue;
        }

        match ch {
            '"' => in_string = true,
            ',' if text[idx + 1..].trim_start().starts_with(['}', ']']) => continue,
            _ => {}
        }
        out.push(ch);
    }

    out
}
