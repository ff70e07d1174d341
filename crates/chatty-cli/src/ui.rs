//! TUI implementation for chatty

use chatty_ai::{ChatMessage, Role};
use chatty_core::{
    ChatEvent, ChatSession, Error as CoreError, FALLBACK_MESSAGE, GateOutcome, SendOutcome,
    SessionGate,
};
use chatty_tui::{
    App, Theme,
    input::{Action, event_to_action},
    widgets::{DisplayMessage, InputBox, MessageList, Spinner, calculate_message_height},
};
use crossterm::event::EventStream;
use futures::StreamExt;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::Modifier,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
};
use std::time::{Duration, Instant};

use crate::commands::{CommandResult, execute_command};

const TITLE: &str = "Chatty";
const TAGLINE: &str = "Feed your curiosity.";
const SUBTITLE: &str = "Chat with an AI assistant powered by OpenAI.";
const EMPTY_STATE: &str = "Hey there, how can I help you today?";
const INPUT_PLACEHOLDER: &str = "Ask me anything...";
pub const PLAYGROUND_NOTICE: &str =
    "This is a public playground environment. Please don't enter any sensitive or personal information.";

/// Lines moved per scroll step
const SCROLL_STEP: usize = 3;

/// What the user asked for with the last key
#[derive(Debug, PartialEq, Eq)]
pub enum UiMessage {
    /// Nothing for the loop to do
    None,
    /// Send a chat message
    Submit(String),
    /// Try a password
    Unlock(String),
    /// Slash command
    Command(String),
    Clear,
    Logout,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Login,
    Chat,
}

/// TUI application state
pub struct TuiState {
    screen: Screen,
    password: InputBox,
    login_message: Option<&'static str>,
    input: InputBox,
    messages: Vec<DisplayMessage>,
    /// Scroll offset in lines; `usize::MAX` follows the bottom
    scroll: usize,
    /// Largest useful offset as of the last render
    max_scroll: usize,
    is_loading: bool,
    /// One-line notice above the input (errors, command output)
    alert: Option<String>,
    /// Output of /help, shown in place of the conversation until the next key
    help: Option<String>,
    model: String,
    theme: Theme,
    spinner_start: Instant,
}

impl TuiState {
    pub fn new(model: impl Into<String>, theme: Theme, unlocked: bool) -> Self {
        let mut password = InputBox::new().masked().with_placeholder("Password");
        password.set_focused(true);
        let mut input = InputBox::new().with_placeholder(INPUT_PLACEHOLDER);
        input.set_focused(true);

        Self {
            screen: if unlocked { Screen::Chat } else { Screen::Login },
            password,
            login_message: None,
            input,
            messages: Vec::new(),
            scroll: usize::MAX,
            max_scroll: 0,
            is_loading: false,
            alert: None,
            help: None,
            model: model.into(),
            theme,
            spinner_start: Instant::now(),
        }
    }

    /// Refresh the view from the conversation
    pub fn sync(&mut self, session: &ChatSession) {
        self.messages = session.messages().iter().map(display_message).collect();
        self.is_loading = session.is_loading();
        self.input.set_disabled(self.is_loading);
    }

    pub fn begin_turn(&mut self) {
        self.alert = None;
        self.help = None;
        self.spinner_start = Instant::now();
        self.is_loading = true;
        self.input.set_disabled(true);
        self.scroll = usize::MAX;
    }

    pub fn finish_turn(&mut self, result: Result<SendOutcome, CoreError>) {
        self.is_loading = false;
        self.input.set_disabled(false);
        match result {
            Ok(SendOutcome::Completed) | Ok(SendOutcome::Ignored) => {}
            Ok(SendOutcome::Failed { message }) => self.alert = Some(message),
            // Nothing was sent; the typed text stays in the box
            Err(e) => self.alert = Some(e.user_message()),
        }
        self.scroll = usize::MAX;
    }

    pub fn handle_event(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::TurnStart { .. } => self.input.clear(),
            ChatEvent::Cleared => {
                self.scroll = usize::MAX;
                self.alert = None;
            }
            _ => {}
        }
    }

    pub fn apply_login(&mut self, outcome: GateOutcome) {
        if outcome == GateOutcome::Unlocked {
            self.screen = Screen::Chat;
            self.login_message = None;
            self.scroll = usize::MAX;
        } else {
            self.login_message = Some(outcome.message());
        }
    }

    pub fn lock(&mut self) {
        self.screen = Screen::Login;
        self.login_message = None;
        self.alert = None;
        self.help = None;
        self.input.clear();
    }

    /// Say up front that no password can open the gate
    pub fn note_unconfigured(&mut self) {
        self.login_message = Some(GateOutcome::NotConfigured.message());
    }

    pub fn show_alert(&mut self, message: impl Into<String>) {
        self.alert = Some(message.into());
    }

    pub fn show_help(&mut self, text: String) {
        self.help = Some(text);
    }

    fn scroll_up(&mut self, lines: usize) {
        let current = self.scroll.min(self.max_scroll);
        self.scroll = current.saturating_sub(lines);
    }

    fn scroll_down(&mut self, lines: usize) {
        let next = self.scroll.saturating_add(lines);
        // Reaching the bottom resumes following new output
        self.scroll = if next >= self.max_scroll { usize::MAX } else { next };
    }

    /// Map a key to what the loop should do
    pub fn handle_action(&mut self, action: Action, width: u16) -> UiMessage {
        match action {
            Action::Interrupt | Action::Escape => return UiMessage::Quit,
            Action::ScrollUp => self.scroll_up(SCROLL_STEP),
            Action::ScrollDown => self.scroll_down(SCROLL_STEP),
            Action::PageUp => self.scroll_up(10),
            Action::PageDown => self.scroll_down(10),
            _ if self.screen == Screen::Login => match action {
                Action::Submit => return UiMessage::Unlock(self.password.take()),
                other => {
                    self.password.handle_action(&other, width);
                }
            },
            Action::Submit => {
                if self.is_loading {
                    return UiMessage::None;
                }
                if self.input.content().trim_start().starts_with('/') {
                    return UiMessage::Command(self.input.take());
                }
                if !self.input.content().trim().is_empty() {
                    return UiMessage::Submit(self.input.content().to_string());
                }
            }
            Action::Clear if !self.is_loading => return UiMessage::Clear,
            Action::Logout if !self.is_loading => return UiMessage::Logout,
            other => {
                self.help = None;
                self.input.handle_action(&other, width);
            }
        }
        UiMessage::None
    }

    pub fn render(&mut self, frame: &mut Frame) {
        match self.screen {
            Screen::Login => self.render_login(frame),
            Screen::Chat => self.render_chat(frame),
        }
    }

    fn render_login(&self, frame: &mut Frame) {
        let area = frame.area();
        let width = area.width.min(48);
        let x = area.x + (area.width - width) / 2;
        let height = 8.min(area.height);
        let y = area.y + (area.height - height) / 2;
        let card = Rect::new(x, y, width, height);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(3),
                Constraint::Length(1),
            ])
            .split(card);

        frame.render_widget(
            Paragraph::new(Span::styled(TITLE, self.theme.accent_bold())).alignment(Alignment::Center),
            rows[0],
        );
        frame.render_widget(
            Paragraph::new(Span::styled(TAGLINE, self.theme.dim_style())).alignment(Alignment::Center),
            rows[1],
        );
        self.password.render(rows[3], frame.buffer_mut(), &self.theme);
        if let Some(message) = self.login_message {
            frame.render_widget(
                Paragraph::new(Span::styled(message, self.theme.error_style()))
                    .alignment(Alignment::Center),
                rows[4],
            );
        }
    }

    fn render_chat(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),    // Messages
                Constraint::Length(1), // Status
                Constraint::Length(3), // Input
                Constraint::Length(1), // Notice
            ])
            .split(frame.area());

        self.render_messages(frame, chunks[0]);
        self.render_status(frame, chunks[1]);
        self.input.render(chunks[2], frame.buffer_mut(), &self.theme);
        frame.render_widget(
            Paragraph::new(Span::styled(PLAYGROUND_NOTICE, self.theme.dim_style()))
                .alignment(Alignment::Center),
            chunks[3],
        );
    }

    fn render_messages(&mut self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(self.theme.border_style())
            .title(format!(" {} │ {} ", TITLE, self.model));
        let inner = block.inner(area);
        frame.render_widget(block, area);
        if inner.height == 0 {
            return;
        }

        if let Some(help) = &self.help {
            let lines: Vec<Line> = help
                .lines()
                .map(|l| Line::from(Span::styled(l.to_string(), self.theme.base_style())))
                .collect();
            frame.render_widget(Paragraph::new(lines), inner);
            return;
        }

        if self.messages.is_empty() {
            let welcome = Paragraph::new(vec![
                Line::from(Span::styled(
                    SUBTITLE,
                    self.theme.dim_style().add_modifier(Modifier::ITALIC),
                )),
                Line::from(""),
                Line::from(Span::styled(EMPTY_STATE, self.theme.accent_bold())),
                Line::from(""),
                Line::from(Span::styled(
                    "Type /help for commands.",
                    self.theme.dim_style(),
                )),
            ])
            .alignment(Alignment::Center);
            frame.render_widget(welcome, inner);
            return;
        }

        // Leave a column for the scrollbar
        let list_width = inner.width.saturating_sub(1) as usize;
        let content_height = calculate_message_height(&self.messages, &self.theme, list_width);
        let max_scroll = content_height.saturating_sub(inner.height as usize);
        self.max_scroll = max_scroll;
        let offset = self.scroll.min(max_scroll);

        let list_area = Rect {
            width: list_width as u16,
            ..inner
        };
        let list = MessageList::new(&self.messages, &self.theme)
            .scroll(offset)
            .spinner_start(self.spinner_start);
        frame.render_widget(list, list_area);

        if content_height > inner.height as usize {
            let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
                .begin_symbol(Some("↑"))
                .end_symbol(Some("↓"))
                .track_symbol(Some("│"))
                .thumb_symbol("█");
            let mut scrollbar_state = ScrollbarState::new(max_scroll).position(offset);
            frame.render_stateful_widget(scrollbar, inner, &mut scrollbar_state);
        }
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        if self.is_loading {
            let spinner =
                Spinner::new("Waiting for reply...", &self.theme).with_start_time(self.spinner_start);
            frame.render_widget(spinner, area);
            return;
        }

        if let Some(alert) = &self.alert {
            frame.render_widget(
                Paragraph::new(Span::styled(format!("⚠ {}", alert), self.theme.error_style())),
                area,
            );
            return;
        }

        let left = format!("{} message(s)", self.messages.len());
        let right = "Ctrl+L: clear │ Ctrl+O: logout │ Ctrl+C: quit";
        let available = area.width as usize;
        let line = if left.chars().count() + right.chars().count() + 2 <= available {
            let spacing = available - left.chars().count() - right.chars().count();
            Line::from(vec![
                Span::styled(left, self.theme.dim_style()),
                Span::raw(" ".repeat(spacing)),
                Span::styled(right, self.theme.dim_style()),
            ])
        } else {
            Line::from(Span::styled(left, self.theme.dim_style()))
        };
        frame.render_widget(Paragraph::new(line), area);
    }
}

/// How a stored message is drawn
pub fn display_message(message: &ChatMessage) -> DisplayMessage {
    if message.is_typing_indicator() {
        return DisplayMessage::typing(message.content.clone());
    }
    match message.role {
        Role::User => DisplayMessage::user(message.content.clone()),
        Role::Assistant if message.content == FALLBACK_MESSAGE => {
            DisplayMessage::error(message.content.clone())
        }
        Role::Assistant => DisplayMessage::assistant(message.content.clone()),
    }
}

fn relock(state: &mut TuiState, gate: &mut SessionGate) {
    gate.logout();
    state.lock();
    if !gate.is_configured() {
        state.note_unconfigured();
    }
}

/// Run the TUI application
pub async fn run_tui(
    session: &ChatSession,
    gate: &mut SessionGate,
    model: &str,
    theme: Theme,
) -> anyhow::Result<()> {
    let mut app = App::new()?;
    let mut state = TuiState::new(model, theme, gate.is_unlocked());
    if !gate.is_unlocked() && !gate.is_configured() {
        state.note_unconfigured();
    }
    let mut chat_events = session.subscribe();
    let mut event_stream = EventStream::new();
    let mut tick_interval = tokio::time::interval(Duration::from_millis(80));
    let mut pending_prompt: Option<String> = None;

    loop {
        if let Some(content) = pending_prompt.take() {
            state.begin_turn();
            let mut turn = std::pin::pin!(session.send(&content));

            // Poll the turn alongside input so the spinner and stream keep drawing
            loop {
                state.sync(session);
                app.draw(|frame| state.render(frame))?;
                let width = app.size()?.width;

                tokio::select! {
                    biased;

                    result = &mut turn => {
                        state.finish_turn(result);
                        break;
                    }

                    event = chat_events.recv() => {
                        if let Ok(event) = event {
                            state.handle_event(&event);
                        }
                    }

                    event = event_stream.next() => {
                        match event {
                            Some(Ok(event)) => {
                                if let Some(action) = event_to_action(event) {
                                    // Only quitting and scrolling do anything mid-turn
                                    if state.handle_action(action, width) == UiMessage::Quit {
                                        return Ok(());
                                    }
                                }
                            }
                            Some(Err(e)) => return Err(e.into()),
                            None => return Ok(()),
                        }
                    }

                    _ = tick_interval.tick() => {}
                }
            }

            while let Ok(event) = chat_events.try_recv() {
                state.handle_event(&event);
            }
            continue;
        }

        state.sync(session);
        app.draw(|frame| state.render(frame))?;
        let width = app.size()?.width;

        tokio::select! {
            biased;

            event = chat_events.recv() => {
                if let Ok(event) = event {
                    state.handle_event(&event);
                }
            }

            event = event_stream.next() => {
                let action = match event {
                    Some(Ok(event)) => event_to_action(event),
                    Some(Err(e)) => break Err(anyhow::anyhow!("Event error: {}", e)),
                    None => break Ok(()),
                };
                let Some(action) = action else { continue };

                match state.handle_action(action, width) {
                    UiMessage::None => {}
                    UiMessage::Submit(content) => pending_prompt = Some(content),
                    UiMessage::Unlock(secret) => {
                        let outcome = gate.attempt(&secret);
                        state.apply_login(outcome);
                    }
                    UiMessage::Clear => session.clear(),
                    UiMessage::Logout => relock(&mut state, gate),
                    UiMessage::Quit => break Ok(()),
                    UiMessage::Command(cmd) => match execute_command(&cmd) {
                        Some(CommandResult::Clear) => session.clear(),
                        Some(CommandResult::Logout) => relock(&mut state, gate),
                        Some(CommandResult::Exit) => break Ok(()),
                        Some(CommandResult::Message(text)) => state.show_help(text),
                        Some(CommandResult::Unknown(cmd)) => {
                            state.show_alert(format!("Unknown command: /{} (try /help)", cmd));
                        }
                        None => {}
                    },
                }
            }

            _ = tick_interval.tick() => {}
        }
    }
}
