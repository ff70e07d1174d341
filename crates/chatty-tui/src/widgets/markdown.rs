//! Markdown rendering for assistant replies

use crate::theme::Theme;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use ratatui::{
    style::{Modifier, Style},
    text::{Line, Span},
};
use unicode_width::UnicodeWidthStr;

/// Convert markdown text to styled lines no wider than `width`
pub fn render_markdown<'a>(text: &str, theme: &Theme, width: usize) -> Vec<Line<'a>> {
    let width = width.max(1);
    let mut lines: Vec<Line<'a>> = Vec::new();
    let mut current: Vec<Span<'a>> = Vec::new();
    let mut styles: Vec<Style> = vec![theme.base_style()];
    let mut in_code_block = false;
    let mut code_block = String::new();
    let mut list_depth: usize = 0;

    // Wrap and flush the pending logical line
    let flush = |current: &mut Vec<Span<'a>>, lines: &mut Vec<Line<'a>>| {
        if !current.is_empty() {
            lines.extend(wrap_spans(std::mem::take(current), width));
        }
    };

    for event in Parser::new(text) {
        let style = *styles.last().unwrap_or(&Style::default());
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { level, .. } => {
                    flush(&mut current, &mut lines);
                    styles.push(match level {
                        HeadingLevel::H1 => theme
                            .accent_style()
                            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
                        HeadingLevel::H2 => theme.accent_style().add_modifier(Modifier::BOLD),
                        _ => theme.accent_style(),
                    });
                }
                Tag::Paragraph => flush(&mut current, &mut lines),
                Tag::CodeBlock(_) => {
                    flush(&mut current, &mut lines);
                    in_code_block = true;
                    code_block.clear();
                }
                Tag::List(_) => list_depth += 1,
                Tag::Item => {
                    flush(&mut current, &mut lines);
                    let indent = "  ".repeat(list_depth.saturating_sub(1));
                    current.push(Span::styled(format!("{}• ", indent), theme.dim_style()));
                }
                Tag::Emphasis => styles.push(style.add_modifier(Modifier::ITALIC)),
                Tag::Strong => styles.push(style.add_modifier(Modifier::BOLD)),
                Tag::Strikethrough => styles.push(style.add_modifier(Modifier::CROSSED_OUT)),
                Tag::Link { .. } => styles.push(Style::default().fg(theme.link)),
                _ => {}
            },
            Event::End(tag_end) => match tag_end {
                TagEnd::Heading(_) => {
                    flush(&mut current, &mut lines);
                    styles.pop();
                }
                TagEnd::Paragraph => {
                    flush(&mut current, &mut lines);
                    lines.push(Line::from(""));
                }
                TagEnd::CodeBlock => {
                    in_code_block = false;
                    let code_style = theme.code_style().add_modifier(Modifier::DIM);
                    for code_line in code_block.lines() {
                        lines.push(Line::from(Span::styled(
                            format!("  {}", truncate(code_line, width.saturating_sub(2))),
                            code_style,
                        )));
                    }
                    lines.push(Line::from(""));
                }
                TagEnd::List(_) => {
                    list_depth = list_depth.saturating_sub(1);
                    if list_depth == 0 {
                        lines.push(Line::from(""));
                    }
                }
                TagEnd::Item => flush(&mut current, &mut lines),
                TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough | TagEnd::Link => {
                    if styles.len() > 1 {
                        styles.pop();
                    }
                }
                _ => {}
            },
            Event::Text(text) => {
                if in_code_block {
                    code_block.push_str(&text);
                } else {
                    current.push(Span::styled(text.into_string(), style));
                }
            }
            Event::Code(code) => {
                current.push(Span::styled(
                    code.into_string(),
                    theme.code_style().add_modifier(Modifier::BOLD),
                ));
            }
            Event::SoftBreak => current.push(Span::styled(" ", style)),
            Event::HardBreak => flush(&mut current, &mut lines),
            _ => {}
        }
    }

    // An unterminated code fence mid-stream still shows its content
    if in_code_block {
        for code_line in code_block.lines() {
            lines.push(Line::from(Span::styled(
                format!("  {}", truncate(code_line, width.saturating_sub(2))),
                theme.code_style(),
            )));
        }
    }
    flush(&mut current, &mut lines);

    while lines
        .last()
        .is_some_and(|l| l.spans.iter().all(|s| s.content.is_empty()))
    {
        lines.pop();
    }

    lines
}

/// Cut `text` to at most `width` display columns, marking the cut with `…`
fn truncate(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.to_string().width();
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

/// Word-wrap styled spans; words longer than `width` are split
fn wrap_spans<'a>(spans: Vec<Span<'a>>, width: usize) -> Vec<Line<'a>> {
    let mut lines = Vec::new();
    let mut line: Vec<Span<'a>> = Vec::new();
    let mut used = 0;

    for span in spans {
        let style = span.style;
        for word in span.content.split_inclusive(' ') {
            let mut word = word.to_string();
            loop {
                let w = word.trim_end().width();
                if used + w <= width {
                    used += word.width();
                    line.push(Span::styled(word, style));
                    break;
                }
                if used > 0 {
                    lines.push(Line::from(std::mem::take(&mut line)));
                    used = 0;
                    continue;
                }
                // Split a word wider than the whole line
                let mut head = String::new();
                let mut head_width = 0;
                let mut rest = word.chars().peekable();
                while let Some(&c) = rest.peek() {
                    let cw = c.to_string().width();
                    if head_width + cw > width && !head.is_empty() {
                        break;
                    }
                    head.push(c);
                    head_width += cw;
                    rest.next();
                }
                line.push(Span::styled(head, style));
                lines.push(Line::from(std::mem::take(&mut line)));
                word = rest.collect();
                if word.is_empty() {
                    break;
                }
            }
        }
    }
    if !line.is_empty() {
        lines.push(Line::from(line));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(lines: &[Line]) -> Vec<String> {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect::<String>())
            .collect()
    }

    #[test]
    fn test_simple_text() {
        let theme = Theme::dark();
        let lines = render_markdown("Hello, world!", &theme, 80);
        assert_eq!(plain(&lines), vec!["Hello, world!"]);
    }

    #[test]
    fn test_strong_keeps_text() {
        let theme = Theme::dark();
        let lines = render_markdown("Hi **there**", &theme, 80);
        assert_eq!(plain(&lines), vec!["Hi there"]);
        let bold = &lines[0].spans[1];
        assert!(bold.style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_code_block() {
        let theme = Theme::dark();
        let md = "```rust\nfn main() {}\n```";
        let lines = render_markdown(md, &theme, 80);
        assert_eq!(plain(&lines), vec!["  fn main() {}"]);
    }

    #[test]
    fn test_wraps_to_width() {
        let theme = Theme::dark();
        let lines = render_markdown("alpha beta gamma delta", &theme, 11);
        for line in plain(&lines) {
            assert!(line.trim_end().width() <= 11, "too wide: {:?}", line);
        }
        assert!(lines.len() >= 2);
    }

    #[test]
    fn test_long_word_is_split() {
        let theme = Theme::dark();
        let lines = render_markdown("abcdefghij", &theme, 4);
        assert_eq!(plain(&lines), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_truncate_multibyte_code() {
        assert_eq!(truncate("日本語のコード", 6), "日本…");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn test_unterminated_fence_while_streaming() {
        let theme = Theme::dark();
        let lines = render_markdown("```\nlet x = 1;", &theme, 80);
        assert_eq!(plain(&lines), vec!["  let x = 1;"]);
    }
}
