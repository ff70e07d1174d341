//! Single-line text input, optionally masked for passwords

use crate::input::Action;
use crate::theme::Theme;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Style,
    widgets::{Block, Borders, Paragraph, Widget},
};
use unicode_width::UnicodeWidthChar;

const MASK_CHAR: char = '•';

/// Single-line text input widget
#[derive(Debug, Default)]
pub struct InputBox {
    content: String,
    /// Cursor position (character index, not byte index)
    cursor: usize,
    /// Horizontal scroll offset (in display width)
    scroll: usize,
    placeholder: String,
    focused: bool,
    masked: bool,
    /// Edits are refused while disabled
    disabled: bool,
}

impl InputBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    /// Render every character as a bullet
    pub fn masked(mut self) -> Self {
        self.masked = true;
        self
    }

    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Take the content, leaving the box empty
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        self.scroll = 0;
        std::mem::take(&mut self.content)
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.cursor = 0;
        self.scroll = 0;
    }

    fn display_char(&self, c: char) -> char {
        if self.masked { MASK_CHAR } else { c }
    }

    fn char_width(&self, c: char) -> usize {
        self.display_char(c).width().unwrap_or(0)
    }

    fn cursor_byte_offset(&self) -> usize {
        self.content
            .char_indices()
            .nth(self.cursor)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len())
    }

    fn cursor_display_width(&self) -> usize {
        self.content
            .chars()
            .take(self.cursor)
            .map(|c| self.char_width(c))
            .sum()
    }

    /// Byte range of the character at `cursor`
    fn char_range_at_cursor(&self) -> std::ops::Range<usize> {
        let start = self.cursor_byte_offset();
        let end = self.content[start..]
            .chars()
            .next()
            .map(|c| start + c.len_utf8())
            .unwrap_or(start);
        start..end
    }

    /// Handle an input action; returns whether it was consumed
    pub fn handle_action(&mut self, action: &Action, width: u16) -> bool {
        if self.disabled {
            return false;
        }
        let char_count = self.content.chars().count();

        let handled = match action {
            Action::Char(c) => {
                self.insert_char(*c);
                true
            }
            Action::Backspace if self.cursor > 0 => {
                self.cursor -= 1;
                let range = self.char_range_at_cursor();
                self.content.drain(range);
                true
            }
            Action::Delete if self.cursor < char_count => {
                let range = self.char_range_at_cursor();
                self.content.drain(range);
                true
            }
            Action::Left if self.cursor > 0 => {
                self.cursor -= 1;
                true
            }
            Action::Right if self.cursor < char_count => {
                self.cursor += 1;
                true
            }
            Action::Home => {
                self.cursor = 0;
                true
            }
            Action::End => {
                self.cursor = char_count;
                true
            }
            Action::ClearLine => {
                self.clear();
                true
            }
            Action::DeleteWord => {
                self.delete_word();
                true
            }
            Action::Paste(text) => {
                for c in text.chars() {
                    if c == '\n' || c == '\r' {
                        // Single line: newlines become one space
                        if !self.content.ends_with(' ') && self.cursor > 0 {
                            self.insert_char(' ');
                        }
                    } else {
                        self.insert_char(c);
                    }
                }
                true
            }
            _ => false,
        };

        if handled {
            self.update_scroll(width as usize);
        }
        handled
    }

    fn delete_word(&mut self) {
        let chars: Vec<char> = self.content.chars().collect();
        let mut start = self.cursor;
        while start > 0 && chars[start - 1] == ' ' {
            start -= 1;
        }
        while start > 0 && chars[start - 1] != ' ' {
            start -= 1;
        }

        let start_byte = self
            .content
            .char_indices()
            .nth(start)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len());
        let end_byte = self.cursor_byte_offset();
        self.content.drain(start_byte..end_byte);
        self.cursor = start;
    }

    fn insert_char(&mut self, c: char) {
        let byte_offset = self.cursor_byte_offset();
        self.content.insert(byte_offset, c);
        self.cursor += 1;
    }

    fn update_scroll(&mut self, width: usize) {
        let visible_width = width.saturating_sub(4).max(1); // borders and padding
        let cursor_pos = self.cursor_display_width();

        if cursor_pos < self.scroll {
            self.scroll = cursor_pos;
        } else if cursor_pos >= self.scroll + visible_width {
            self.scroll = cursor_pos - visible_width + 1;
        }
    }

    /// The part of the content visible at the current scroll offset
    fn visible_text(&self, visible_width: usize) -> String {
        let mut skipped = 0;
        let mut used = 0;
        let mut visible = String::new();
        for c in self.content.chars() {
            let w = self.char_width(c);
            if skipped < self.scroll {
                skipped += w;
                continue;
            }
            if used + w > visible_width {
                break;
            }
            visible.push(self.display_char(c));
            used += w;
        }
        visible
    }

    pub fn render(&self, area: Rect, buf: &mut Buffer, theme: &Theme) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(if self.focused && !self.disabled {
                theme.accent_style()
            } else {
                theme.border_style()
            });

        let inner = block.inner(area);
        block.render(area, buf);

        let (text, style) = if self.content.is_empty() {
            (self.placeholder.clone(), theme.dim_style())
        } else if self.disabled {
            (self.visible_text(inner.width as usize), theme.dim_style())
        } else {
            (self.visible_text(inner.width as usize), theme.base_style())
        };
        Paragraph::new(text).style(style).render(inner, buf);

        if self.focused && !self.disabled && inner.width > 0 {
            let cursor_x = self.cursor_display_width().saturating_sub(self.scroll);
            if cursor_x < inner.width as usize {
                let x = inner.x + cursor_x as u16;
                if let Some(cell) = buf.cell_mut((x, inner.y)) {
                    cell.set_style(Style::default().bg(theme.accent));
                }
            }
        }
    }
}
