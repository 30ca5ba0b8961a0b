//! Compact output rendering helpers for CLI surfaces.
//!
//! Keeps command result output bounded and readable while preserving signal.

use colored::Colorize;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Prefix every line with a zero-padded line number.
pub fn numbered_lines(text: &str, color: bool) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| {
            let number = format!("{:03}", i);
            if color {
                format!("{}\t{}", number.green(), line)
            } else {
                format!("{}\t{}", number, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
