use super::patterns::{RE_ANSI, RE_OSC};

/// Non-empty lines kept from the bottom of a capture.
pub const TAIL_WINDOW: usize = 20;

/// Removes escape sequences and other control characters, keeping newlines and tabs.
pub fn strip_control_sequences(raw: &str) -> String {
    let without_osc = RE_OSC.replace_all(raw, "");
    let without_ansi = RE_ANSI.replace_all(&without_osc, "");
    without_ansi
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// The trimmed, non-empty bottom lines of a terminal capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenTail {
    lines: Vec<String>,
}

impl ScreenTail {
    pub fn from_capture(raw: &str) -> Self {
        Self::with_window(raw, TAIL_WINDOW)
    }

    pub fn with_window(raw: &str, window: usize) -> Self {
        let clean = strip_control_sequences(raw);
        let all: Vec<String> = clean
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let start = all.len().saturating_sub(window);
        Self {
            lines: all[start..].to_vec(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The last `n` lines (fewer when the tail is shorter).
    pub fn last(&self, n: usize) -> &[String] {
        let start = self.lines.len().saturating_sub(n);
        &self.lines[start..]
    }

    pub fn joined(lines: &[String]) -> String {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_csi_osc_and_carriage_returns() {
        let raw = "\x1b[1;32m❯ 1. Yes\x1b[0m\r\n\x1b]0;title\x07plain\x1b[2K";
        assert_eq!(strip_control_sequences(raw), "❯ 1. Yes\nplain");
    }

    #[test]
    fn tail_drops_blank_lines_and_keeps_the_bottom() {
        let raw: String = (0..30).map(|i| format!("line {}\n\n   \n", i)).collect();
        let tail = ScreenTail::from_capture(&raw);
        assert_eq!(tail.len(), TAIL_WINDOW);
        assert_eq!(tail.lines().first().map(String::as_str), Some("line 10"));
        assert_eq!(tail.last(2), &["line 28".to_string(), "line 29".to_string()]);
    }

    #[test]
    fn last_on_short_tail_returns_everything() {
        let tail = ScreenTail::from_capture("  a  \nb");
        assert_eq!(tail.last(10), &["a".to_string(), "b".to_string()]);
    }
}
