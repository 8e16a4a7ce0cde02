//! Error/stack-trace rewriting for injected scripts
//!
//! User script text is evaluated inside a fixed wrapper function, so the
//! call frames the browser reports point into the wrapper body, not the
//! user's source. The wrapper's line/column offsets are recorded when the
//! payload is built (never recovered by string search afterwards), which
//! lets the rewriter map a wrapper-internal frame back onto the original
//! line and splice a caret-annotated snippet into the surfaced error.

use crate::commands::{CallFrame, ExceptionDetails};

const WRAPPER_PREFIX: &str = "(function anonymous(\n) {\n";
const WRAPPER_SUFFIX: &str = "\n})";

/// Injection payload built from a fixed template, with the user source's
/// position inside it tracked explicitly
#[derive(Debug, Clone)]
pub struct ScriptTemplate {
    wrapped: String,
    /// 0-based line inside the wrapper where the user source starts
    line_offset: u64,
    /// Column of the user source on its first line
    column_offset: u64,
}

impl ScriptTemplate {
    pub fn wrap(user_source: &str) -> Self {
        let line_offset = WRAPPER_PREFIX.matches('\n').count() as u64;
        Self {
            wrapped: format!("{WRAPPER_PREFIX}{user_source}{WRAPPER_SUFFIX}"),
            line_offset,
            column_offset: 0,
        }
    }

    /// The full wrapped payload to hand to `script.evaluate`
    pub fn source(&self) -> &str {
        &self.wrapped
    }

    pub fn line_offset(&self) -> u64 {
        self.line_offset
    }
}

/// Rewrite a script-evaluation exception so its stack points at the user's
/// source instead of wrapper internals.
///
/// Two input shapes are handled: a raw remote stack (call frames present,
/// lines relative to the wrapper) and a stack a previous layer already
/// rewrote into text (no frames; only path separators need normalizing).
pub fn rewrite_exception(
    details: &ExceptionDetails,
    template: &ScriptTemplate,
    user_source: &str,
) -> String {
    let frames = &details.stack_trace.call_frames;
    if frames.is_empty() {
        return normalize_separators(&details.text);
    }

    let Some(frame) = wrapper_frame(frames, template) else {
        // Nothing points into the wrapper; keep the remote stack as-is
        return format!(
            "{}\n{}",
            normalize_separators(&details.text),
            render_frames(frames)
        );
    };

    let user_line = frame.line_number - template.line_offset; // 0-based
    let user_column = if user_line == 0 {
        frame.column_number.saturating_sub(template.column_offset)
    } else {
        frame.column_number
    };

    let mut output = normalize_separators(&details.text);
    if let Some(snippet) = render_snippet(user_source, user_line, user_column) {
        output.push_str("\n\n");
        output.push_str(&snippet);
    }

    // Keep the real frames below the snippet, minus the wrapper-internal one
    let remaining: Vec<&CallFrame> = frames
        .iter()
        .filter(|f| !is_wrapper_frame(f, template))
        .collect();
    if !remaining.is_empty() {
        output.push('\n');
        for frame in remaining {
            output.push_str(&format_frame(frame));
            output.push('\n');
        }
    }
    output
}

/// First frame that points into the wrapped body
fn wrapper_frame<'a>(frames: &'a [CallFrame], template: &ScriptTemplate) -> Option<&'a CallFrame> {
    frames.iter().find(|f| is_wrapper_frame(f, template))
}

fn is_wrapper_frame(frame: &CallFrame, template: &ScriptTemplate) -> bool {
    frame.line_number >= template.line_offset
        && (frame.url.is_empty() || frame.function_name == "anonymous")
}

/// Caret-annotated excerpt of the user source around the failing line
fn render_snippet(user_source: &str, line: u64, column: u64) -> Option<String> {
    let lines: Vec<&str> = user_source.lines().collect();
    let line = usize::try_from(line).ok()?;
    if line >= lines.len() {
        return None;
    }

    let first = line.saturating_sub(2);
    let last = (line + 2).min(lines.len() - 1);
    let gutter = (last + 1).to_string().len();

    let mut out = String::new();
    for (index, text) in lines.iter().enumerate().take(last + 1).skip(first) {
        let marker = if index == line { ">" } else { " " };
        out.push_str(&format!(
            "{marker} {:>gutter$} | {text}\n",
            index + 1,
            gutter = gutter
        ));
        if index == line {
            let pad = " ".repeat(column as usize);
            out.push_str(&format!("  {:>gutter$} | {pad}^\n", "", gutter = gutter));
        }
    }
    Some(out.trim_end().to_string())
}

fn render_frames(frames: &[CallFrame]) -> String {
    frames
        .iter()
        .map(format_frame)
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_frame(frame: &CallFrame) -> String {
    let name = if frame.function_name.is_empty() {
        "<anonymous>"
    } else {
        &frame.function_name
    };
    format!(
        "    at {} ({}:{}:{})",
        name,
        normalize_separators(&frame.url),
        frame.line_number + 1,
        frame.column_number + 1
    )
}

/// Windows and Linux runners disagree on path separators in rewritten stacks
fn normalize_separators(text: &str) -> String {
    text.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::StackTrace;
    use serde_json::json;

    fn exception(text: &str, frames: Vec<CallFrame>) -> ExceptionDetails {
        ExceptionDetails {
            column_number: frames.first().map_or(0, |f| f.column_number),
            line_number: frames.first().map_or(0, |f| f.line_number),
            exception: json!({ "type": "error" }),
            stack_trace: StackTrace {
                call_frames: frames,
            },
            text: text.to_string(),
        }
    }

    fn frame(line: u64, column: u64, function: &str, url: &str) -> CallFrame {
        CallFrame {
            line_number: line,
            column_number: column,
            function_name: function.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_wrap_records_offsets() {
        let template = ScriptTemplate::wrap("const a = 1;\nboom();");
        assert_eq!(template.line_offset(), 2);
        assert!(template.source().starts_with("(function anonymous("));
        assert!(template.source().contains("const a = 1;\nboom();"));
        assert!(template.source().ends_with("\n})"));
    }

    #[test]
    fn test_rewrite_points_at_user_line() {
        let user_source = "const a = 1;\nboom();\nreturn a;";
        let template = ScriptTemplate::wrap(user_source);
        // Wrapper occupies lines 0-1, so user line 2 (1-based) is frame line 3
        let details = exception(
            "ReferenceError: boom is not defined",
            vec![frame(3, 0, "anonymous", "")],
        );

        let rewritten = rewrite_exception(&details, &template, user_source);
        assert!(rewritten.starts_with("ReferenceError: boom is not defined"));
        assert!(rewritten.contains("> 2 | boom();"));
        assert!(rewritten.contains("| ^"));
        // The wrapper-internal frame must be gone
        assert!(!rewritten.contains("at anonymous"));
    }

    #[test]
    fn test_rewrite_keeps_non_wrapper_frames() {
        let user_source = "helper();";
        let template = ScriptTemplate::wrap(user_source);
        let details = exception(
            "Error: inner",
            vec![
                frame(12, 4, "helper", "https://example.com/app.js"),
                frame(2, 0, "anonymous", ""),
            ],
        );

        let rewritten = rewrite_exception(&details, &template, user_source);
        assert!(rewritten.contains("> 1 | helper();"));
        assert!(rewritten.contains("at helper (https://example.com/app.js:13:5)"));
    }

    #[test]
    fn test_already_rewritten_stack_is_normalized() {
        let template = ScriptTemplate::wrap("x");
        let details = exception(
            "Error: fail\n    at spec (C:\\runner\\specs\\login.spec.js:10:3)",
            vec![],
        );

        let rewritten = rewrite_exception(&details, &template, "x");
        assert_eq!(
            rewritten,
            "Error: fail\n    at spec (C:/runner/specs/login.spec.js:10:3)"
        );
    }

    #[test]
    fn test_out_of_range_frame_falls_back_to_text() {
        let user_source = "short();";
        let template = ScriptTemplate::wrap(user_source);
        let details = exception("Error: odd", vec![frame(40, 0, "anonymous", "")]);

        let rewritten = rewrite_exception(&details, &template, user_source);
        assert!(rewritten.starts_with("Error: odd"));
        assert!(!rewritten.contains('>'));
    }

    #[test]
    fn test_snippet_window_and_gutter() {
        let source = "l1\nl2\nl3\nl4\nl5\nl6";
        let snippet = render_snippet(source, 3, 1).unwrap();
        // Two lines of context either side of the failing line
        assert!(snippet.contains("  2 | l2"));
        assert!(snippet.contains("> 4 | l4"));
        assert!(snippet.contains("  6 | l6"));
        assert!(!snippet.contains("| l1"));
    }
}
