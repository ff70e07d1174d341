//! chatty-tui: terminal widgets for the chat client
//!
//! A small widget set on ratatui and crossterm: a masked-capable input box,
//! a markdown-aware message list, a spinner and the color themes.

pub mod app;
pub mod input;
pub mod theme;
pub mod widgets;

pub use app::App;
pub use theme::Theme;
