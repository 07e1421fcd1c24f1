//! Boxed section headers for human-facing command output.

fn term_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|w| *w >= 20)
        .unwrap_or(80)
}

pub fn header(text: &str) -> String {
    let width = term_width();
    let h_line = "─".repeat(width - 2);
    let emoji = "🎯 ";
    let pad = width.saturating_sub(text.chars().count() + emoji.chars().count() + 3);
    format!(
        "┌{h}┐\n│{blank}│\n│ {emoji}{text}{pad}│\n│{blank}│\n└{h}┘",
        h = h_line,
        blank = " ".repeat(width - 2),
        emoji = emoji,
        text = text,
        pad = " ".repeat(pad),
    )
}

pub fn print_header(text: &str) {
    println!("{}", header(text));
}
