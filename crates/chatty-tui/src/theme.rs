//! Color theme support

use ratatui::style::{Color, Modifier, Style};

/// Color theme for the UI
#[derive(Debug, Clone)]
pub struct Theme {
    /// Background color
    pub bg: Color,
    /// Primary text color
    pub fg: Color,
    /// Dimmed/secondary text
    pub dim: Color,
    /// Accent color (title, user messages, cursor)
    pub accent: Color,
    /// Fallback replies and login failures
    pub error: Color,
    /// Assistant message header
    pub assistant: Color,
    /// Typing indicator spinner
    pub typing: Color,
    /// Border color
    pub border: Color,
    /// Code/preformatted text color
    pub code: Color,
    /// Link color
    pub link: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}

impl Theme {
    /// Dark theme (default)
    pub fn dark() -> Self {
        Self {
            bg: Color::Reset,
            fg: Color::White,
            dim: Color::DarkGray,
            accent: Color::Cyan,
            error: Color::Red,
            assistant: Color::Green,
            typing: Color::Yellow,
            border: Color::DarkGray,
            code: Color::Magenta,
            link: Color::Blue,
        }
    }

    /// Light theme
    pub fn light() -> Self {
        Self {
            bg: Color::White,
            fg: Color::Black,
            dim: Color::Gray,
            accent: Color::Blue,
            error: Color::Red,
            assistant: Color::Rgb(0, 128, 64),
            typing: Color::Rgb(180, 120, 0),
            border: Color::Gray,
            code: Color::Magenta,
            link: Color::Blue,
        }
    }

    /// Pick a theme by name; anything but "light" is dark
    pub fn by_name(name: &str) -> Self {
        match name {
            "light" => Self::light(),
            _ => Self::dark(),
        }
    }

    /// Get base style
    pub fn base_style(&self) -> Style {
        Style::default().fg(self.fg).bg(self.bg)
    }

    /// Get dimmed style
    pub fn dim_style(&self) -> Style {
        Style::default().fg(self.dim)
    }

    /// Get accent style
    pub fn accent_style(&self) -> Style {
        Style::default().fg(self.accent)
    }

    /// Get bold accent style
    pub fn accent_bold(&self) -> Style {
        Style::default()
            .fg(self.accent)
            .add_modifier(Modifier::BOLD)
    }

    /// Get error style
    pub fn error_style(&self) -> Style {
        Style::default().fg(self.error)
    }

    pub fn assistant_style(&self) -> Style {
        Style::default()
            .fg(self.assistant)
            .add_modifier(Modifier::BOLD)
    }

    pub fn typing_style(&self) -> Style {
        Style::default().fg(self.typing)
    }

    /// Get code/preformatted style
    pub fn code_style(&self) -> Style {
        Style::default().fg(self.code)
    }

    /// Get border style
    pub fn border_style(&self) -> Style {
        Style::default().fg(self.border)
    }
}
