//! Output truncation strategies for tool, sandbox and memory text.
//!
//! Limits are measured in characters, never bytes, so multi-byte text is
//! never split inside a code point.

/// How to truncate output that exceeds the maximum character limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationMode {
    /// Keep first `max_chars`, with a marker at the end.
    Head,
    /// Keep first 40% and last 60%, with a marker in the middle.
    HeadTail,
    /// Keep last `max_chars`, with a marker at the start.
    Tail,
}

/// Truncate `output` to at most `max_chars` characters using the given mode.
///
/// If the output is within the limit, it is returned unchanged.
/// Otherwise a warning marker is inserted indicating how many characters were removed.
pub fn truncate_output(output: &str, max_chars: usize, mode: TruncationMode) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let removed = total - max_chars;

    match mode {
        TruncationMode::Head => {
            let head = take_chars(output, max_chars);
            format!(
                "{}\n[WARNING: Output truncated. {} characters removed from end]",
                head, removed
            )
        }
        TruncationMode::HeadTail => {
            let head_size = max_chars * 40 / 100;
            let tail_size = max_chars - head_size;
            let head = take_chars(output, head_size);
            let tail = skip_chars(output, total - tail_size);
            format!(
                "{}\n[WARNING: Output truncated. {} characters removed from middle]\n{}",
                head, removed, tail
            )
        }
        TruncationMode::Tail => {
            let tail = skip_chars(output, removed);
            format!(
                "\n[WARNING: Output truncated. {} characters removed from start]\n{}",
                removed, tail
            )
        }
    }
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn skip_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}
