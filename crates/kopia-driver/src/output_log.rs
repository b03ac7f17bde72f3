use tracing::debug;

use crate::executor::ExecTarget;

const MAX_LINE_CHARS: usize = 4096;

#[derive(Clone, Copy)]
enum Escape {
    None,
    Start,
    Csi,
    // OSC/DCS/PM/APC payloads run until BEL or ST (`ESC \`).
    String { bel_ends: bool, saw_esc: bool },
}

/// Strips terminal escape sequences and control characters from one line of
/// engine output and caps it at a fixed length.
pub fn sanitize_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut state = Escape::None;
    let mut kept = 0usize;

    for c in input.chars() {
        state = match state {
            Escape::Start => match c {
                '[' => Escape::Csi,
                ']' => Escape::String {
                    bel_ends: true,
                    saw_esc: false,
                },
                'P' | 'X' | '^' | '_' => Escape::String {
                    bel_ends: false,
                    saw_esc: false,
                },
                _ => Escape::None,
            },
            Escape::Csi if ('@'..='~').contains(&c) => Escape::None,
            Escape::Csi => Escape::Csi,
            Escape::String { bel_ends, saw_esc } => {
                if (bel_ends && c == '\x07') || (saw_esc && c == '\\') {
                    Escape::None
                } else {
                    Escape::String {
                        bel_ends,
                        saw_esc: c == '\x1b',
                    }
                }
            }
            Escape::None => {
                if c == '\x1b' {
                    Escape::Start
                } else {
                    let visible = match c {
                        '\t' => Some(' '),
                        c if c.is_control() || is_bidi_control(c) => None,
                        c => Some(c),
                    };
                    if let Some(v) = visible {
                        if kept == MAX_LINE_CHARS {
                            out.push_str(" ...[truncated]");
                            return out;
                        }
                        out.push(v);
                        kept += 1;
                    }
                    Escape::None
                }
            }
        };
    }
    out
}

fn is_bidi_control(c: char) -> bool {
    matches!(
        c,
        '\u{061C}' | '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}'
    )
}

/// Logs captured engine output one sanitised line at a time.
pub fn log_output(target: &ExecTarget, stream: &str, text: &str) {
    for line in text.split(['\r', '\n']) {
        let line = sanitize_line(line);
        if line.trim().is_empty() {
            continue;
        }
        debug!(
            namespace = %target.namespace,
            pod = %target.pod,
            container = %target.container,
            stream,
            "{line}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::sanitize_line;

    #[test]
    fn removes_colour_and_title_sequences() {
        let got = sanitize_line("\u{1b}[31mERROR\u{1b}[0m x \u{1b}]0;t\u{7}y");
        assert_eq!(got, "ERROR x y");
    }

    #[test]
    fn removes_st_terminated_payload() {
        assert_eq!(sanitize_line("a\u{1b}Pdata\u{1b}\\b"), "ab");
    }

    #[test]
    fn tabs_become_spaces_and_controls_vanish() {
        assert_eq!(sanitize_line("a\tb\u{7}c\u{202e}d"), "a bcd");
    }

    #[test]
    fn long_lines_are_truncated() {
        let got = sanitize_line(&"x".repeat(5000));
        assert!(got.ends_with(" ...[truncated]"));
        assert_eq!(got.chars().filter(|c| *c == 'x').count(), 4096);
        assert_eq!(sanitize_line(&"x".repeat(4096)).len(), 4096);
    }
}
