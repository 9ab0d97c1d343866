//! Helpers that keep user-supplied text from breaking single-line log records.

const MAX_PREVIEW: usize = 300;

/// Escape a string for single-line logging.
///
/// Newlines, carriage returns, tabs and backslashes are escaped, other control
/// characters become `\xNN`, and strings longer than 300 characters are cut with an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape a console line for the debug log, masking the password argument of
/// `LOGIN` and `REGISTER`.
pub fn redact_command(line: &str) -> String {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    if verb.eq_ignore_ascii_case("login") || verb.eq_ignore_ascii_case("register") {
        let user = parts.next().unwrap_or_default();
        return escape_log(&format!("{} {} ****", verb, user));
    }
    escape_log(line)
}
