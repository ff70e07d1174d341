//! Slash commands for interactive mode

/// Result of executing a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Clear the conversation
    Clear,
    /// Lock the session again
    Logout,
    /// Show a message to the user (not sent to the model)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command; `None` if `input` is not one
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let command = input.strip_prefix('/')?;
    let command = command.split_whitespace().next().unwrap_or("").to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),
        "clear" | "c" => CommandResult::Clear,
        "logout" => CommandResult::Logout,
        "quit" | "exit" | "q" => CommandResult::Exit,
        _ => CommandResult::Unknown(command),
    })
}

pub fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /clear, /c           Clear conversation history
  /logout              Lock chatty until the password is entered again
  /quit, /exit, /q     Exit chatty

Keys (TUI):
  Enter                Send message
  Ctrl+L               Clear conversation
  Ctrl+O               Log out
  PgUp/PgDn, wheel     Scroll
  Ctrl+C, Esc          Quit"#
        .to_string()
}
