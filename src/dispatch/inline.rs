//! Inline strategy: synchronous, strictly non-executable validation of
//! data-interchange content. Anything that must run caller logic goes
//! through the offloaded-worker strategy instead, by design.
//!
//! Output goes through an explicit sink parameter; no shared stream is
//! ever intercepted or patched.

use crate::domain::StreamKind;

pub(crate) struct InlineOutcome {
    pub exit_code: i32,
}

pub(crate) fn run_inline(
    runtime_id: &str,
    content: &str,
    emit: &mut dyn FnMut(StreamKind, &str),
) -> InlineOutcome {
    match runtime_id {
        "json" => validate_json(content, emit),
        "css" => validate_css(content, emit),
        other => {
            emit(
                StreamKind::Stderr,
                &format!("unknown inline runtime: {other}"),
            );
            InlineOutcome { exit_code: 1 }
        }
    }
}

/// Parses and pretty-prints; the formatted document is the run's output.
fn validate_json(content: &str, emit: &mut dyn FnMut(StreamKind, &str)) -> InlineOutcome {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) => {
            let pretty =
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            for line in pretty.lines() {
                emit(StreamKind::Stdout, line);
            }
            InlineOutcome { exit_code: 0 }
        }
        Err(err) => {
            emit(StreamKind::Stderr, &format!("invalid JSON: {err}"));
            InlineOutcome { exit_code: 1 }
        }
    }
}

fn validate_css(content: &str, emit: &mut dyn FnMut(StreamKind, &str)) -> InlineOutcome {
    match scan_css(content) {
        Ok(blocks) => {
            emit(
                StreamKind::Stdout,
                &format!("CSS validated: {blocks} rule block(s)"),
            );
            InlineOutcome { exit_code: 0 }
        }
        Err(msg) => {
            emit(StreamKind::Stderr, &format!("invalid CSS: {msg}"));
            InlineOutcome { exit_code: 1 }
        }
    }
}

/// Structural scan: balanced braces outside comments and strings.
fn scan_css(src: &str) -> Result<usize, String> {
    let mut depth: i64 = 0;
    let mut blocks = 0usize;
    let mut in_comment = false;
    let mut in_string: Option<char> = None;
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        if in_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_comment = false;
            }
            continue;
        }
        if let Some(quote) = in_string {
            if c == '\\' {
                chars.next();
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_comment = true;
            }
            '"' | '\'' => in_string = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unexpected '}'".to_string());
                }
                if depth == 0 {
                    blocks += 1;
                }
            }
            _ => {}
        }
    }

    if in_comment {
        Err("unterminated comment".to_string())
    } else if in_string.is_some() {
        Err("unterminated string".to_string())
    } else if depth > 0 {
        Err(format!("{depth} unclosed block(s)"))
    } else {
        Ok(blocks)
    }
}
