//! Message list widget for displaying chat messages

use crate::theme::Theme;
use crate::widgets::markdown::render_markdown;
use crate::widgets::spinner::frame_at;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    text::{Line, Span},
    widgets::{Paragraph, Widget},
};
use std::time::Instant;

/// Who wrote a displayed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayRole {
    User,
    Assistant,
}

/// A single message as the list draws it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub role: DisplayRole,
    pub content: String,
    /// Drawn in the error color instead of as markdown
    pub is_error: bool,
    /// Placeholder shown while waiting for the first token
    pub is_typing: bool,
}

impl DisplayMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: DisplayRole::User,
            content: content.into(),
            is_error: false,
            is_typing: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: DisplayRole::Assistant,
            content: content.into(),
            is_error: false,
            is_typing: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content)
        }
    }

    pub fn typing(label: impl Into<String>) -> Self {
        Self {
            is_typing: true,
            ..Self::assistant(label)
        }
    }
}

/// Widget for displaying a list of chat messages
pub struct MessageList<'a> {
    messages: &'a [DisplayMessage],
    theme: &'a Theme,
    scroll: usize,
    started: Option<Instant>,
}

impl<'a> MessageList<'a> {
    pub fn new(messages: &'a [DisplayMessage], theme: &'a Theme) -> Self {
        Self {
            messages,
            theme,
            scroll: 0,
            started: None,
        }
    }

    /// Set scroll offset in lines from the top
    pub fn scroll(mut self, scroll: usize) -> Self {
        self.scroll = scroll;
        self
    }

    /// Animate the typing indicator from this instant
    pub fn spinner_start(mut self, started: Instant) -> Self {
        self.started = Some(started);
        self
    }
}

/// Lay out one message at `width` columns
fn message_lines(
    msg: &DisplayMessage,
    theme: &Theme,
    width: usize,
    started: Option<Instant>,
) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    let (role_text, role_style, prefix) = match msg.role {
        DisplayRole::User => ("You", theme.accent_bold(), "▶ "),
        DisplayRole::Assistant => (
            "Assistant",
            theme.assistant_style(),
            "◀ ",
        ),
    };
    lines.push(Line::from(Span::styled(
        format!("{}{}", prefix, role_text),
        role_style,
    )));

    let content_width = width.saturating_sub(2).max(1);

    if msg.is_typing {
        let frame = frame_at(started.map(|s| s.elapsed()).unwrap_or_default());
        lines.push(Line::from(Span::styled(
            format!("  {} {}", frame, msg.content),
            theme.typing_style(),
        )));
    } else if msg.role == DisplayRole::Assistant && !msg.is_error {
        for line in render_markdown(&msg.content, theme, content_width) {
            let mut spans = vec![Span::raw("  ")];
            spans.extend(line.spans);
            lines.push(Line::from(spans));
        }
    } else {
        let style = if msg.is_error {
            theme.error_style()
        } else {
            theme.base_style()
        };
        for line in textwrap::wrap(&msg.content, content_width) {
            lines.push(Line::from(Span::styled(format!("  {}", line), style)));
        }
    }

    lines.push(Line::from(""));
    lines
}

impl Widget for MessageList<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.width == 0 || area.height == 0 {
            return;
        }

        let width = area.width as usize;
        let visible: Vec<Line> = self
            .messages
            .iter()
            .flat_map(|m| message_lines(m, self.theme, width, self.started))
            .skip(self.scroll)
            .take(area.height as usize)
            .collect();

        Paragraph::new(visible).render(area, buf);
    }
}

/// Total rendered height of `messages` at `width` columns
pub fn calculate_message_height(messages: &[DisplayMessage], theme: &Theme, width: usize) -> usize {
    messages
        .iter()
        .map(|m| message_lines(m, theme, width, None).len())
        .sum()
}
