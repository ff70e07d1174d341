//! chatty - password-gated terminal chat client

mod commands;
mod config;
mod ui;

use chatty_ai::{CompletionOptions, OpenAiClient};
use chatty_core::{
    ChatEvent, ChatSession, FALLBACK_MESSAGE, FileStorage, GateOutcome, MemoryStorage,
    MessageStore, SendOutcome, SessionGate, Storage,
};
use chatty_tui::Theme;
use clap::Parser;
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{CommandResult, execute_command};

/// chatty - chat with an OpenAI model from the terminal
///
/// The password prompt only keeps casual users out: it is compared in plain
/// text and the unlock is remembered on disk. This is a public playground;
/// don't enter sensitive or personal information.
#[derive(Parser, Debug)]
#[command(name = "chatty")]
#[command(author, version, about)]
struct Args {
    /// Model to use (default: gpt-4o)
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long)]
    base_url: Option<String>,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Disable TUI mode (use simple stdin/stdout)
    #[arg(long)]
    no_tui: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Forget the remembered unlock and exit
    #[arg(long)]
    logout: bool,

    /// Keep history and unlock state in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Clear the stored conversation before starting
    #[arg(long)]
    clear: bool,
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) {
    let filter = if verbose {
        EnvFilter::new("chatty=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // The TUI owns the terminal, so logs go to a file there
    if let Some(path) = log_file {
        let file = path
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .and_then(|_| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
            });
        match file {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file))
                    .init();
            }
            Err(e) => {
                eprintln!("Warning: Failed to open log file {}: {}", path.display(), e);
            }
        }
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let use_tui = args.command.is_none() && !args.no_tui && cfg.tui.unwrap_or(true);
    let data_dir = cfg.data_dir();

    let log_file = data_dir.join("chatty.log");
    init_tracing(args.verbose, use_tui.then_some(log_file.as_path()));

    let storage: Arc<dyn Storage> = if args.ephemeral {
        Arc::new(MemoryStorage::new())
    } else {
        Arc::new(FileStorage::new(&data_dir))
    };

    let mut gate = SessionGate::new(cfg.password(), storage.clone());
    if args.logout {
        gate.logout();
        println!("Logged out.");
        return Ok(());
    }
    gate.restore();

    let options = CompletionOptions {
        model: args.model.unwrap_or_else(|| cfg.model()),
        base_url: args.base_url.unwrap_or_else(|| cfg.base_url()),
        stream: !args.no_stream && cfg.stream.unwrap_or(true),
    };
    tracing::debug!(
        model = %options.model,
        base_url = %options.base_url,
        stream = options.stream,
        data_dir = %data_dir.display(),
        "Starting chatty"
    );

    let mut store = MessageStore::load(storage);
    if args.clear {
        store.clear();
    }
    let model = options.model.clone();
    let backend = Arc::new(OpenAiClient::new(cfg.api_key(), options));
    let session = ChatSession::new(store.into_shared(), backend);

    if let Some(command) = args.command {
        if !unlock_plain(&mut gate)? {
            std::process::exit(1);
        }
        return run_command(&session, &command).await;
    }

    if use_tui {
        let theme = Theme::by_name(cfg.theme.as_deref().unwrap_or("dark"));
        return ui::run_tui(&session, &mut gate, &model, theme).await;
    }

    run_interactive(&session, &mut gate, &model).await
}

/// Prompt for the password on stdin until the gate opens or input ends
fn unlock_plain(gate: &mut SessionGate) -> anyhow::Result<bool> {
    if gate.is_unlocked() {
        return Ok(true);
    }
    if !gate.is_configured() {
        eprintln!("{}", GateOutcome::NotConfigured.message());
        eprintln!("Set `password` in the config file or {}.", config::PASSWORD_ENV);
        return Ok(false);
    }

    loop {
        let Some(secret) = read_password("Password: ")? else {
            return Ok(false);
        };
        match gate.attempt(&secret) {
            GateOutcome::Unlocked => return Ok(true),
            outcome => eprintln!("{}", outcome.message()),
        }
    }
}

/// Read a line without echoing it when stdin is a terminal; `None` at end of input
fn read_password(prompt: &str) -> io::Result<Option<String>> {
    eprint!("{}", prompt);
    io::stderr().flush()?;

    if !io::stdin().is_terminal() {
        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        return Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()));
    }

    use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
    use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

    enable_raw_mode()?;
    let mut secret = String::new();
    let result = loop {
        let key = match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => key,
            Ok(_) => continue,
            Err(e) => break Err(e),
        };
        match key.code {
            KeyCode::Enter => break Ok(Some(secret)),
            KeyCode::Char('c') | KeyCode::Char('d')
                if key.modifiers.contains(KeyModifiers::CONTROL) =>
            {
                break Ok(None);
            }
            KeyCode::Backspace => {
                secret.pop();
            }
            KeyCode::Char(c) => secret.push(c),
            _ => {}
        }
    };
    disable_raw_mode()?;
    eprintln!();
    result
}

/// Run one turn, printing events as they arrive
async fn run_turn(session: &ChatSession, input: &str) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    let mut turn = std::pin::pin!(session.send(input));
    let mut out = io::stdout();

    let result = loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                if let Ok(event) = event {
                    print_event(&mut out, &event)?;
                }
            }
            result = &mut turn => break result,
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&mut out, &event)?;
    }

    match result {
        Ok(SendOutcome::Failed { .. }) => println!("{}", FALLBACK_MESSAGE),
        Ok(_) => {}
        Err(e) => eprintln!("{}", e.user_message()),
    }
    Ok(())
}

fn print_event(out: &mut impl Write, event: &ChatEvent) -> io::Result<()> {
    match event {
        ChatEvent::Token { delta, .. } => {
            write!(out, "{}", delta)?;
            out.flush()
        }
        ChatEvent::TurnEnd { .. } => writeln!(out),
        ChatEvent::Error { message } => {
            eprintln!("Error: {}", message);
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn run_command(session: &ChatSession, command: &str) -> anyhow::Result<()> {
    run_turn(session, command).await
}

async fn run_interactive(
    session: &ChatSession,
    gate: &mut SessionGate,
    model: &str,
) -> anyhow::Result<()> {
    if io::stderr().is_terminal() {
        eprintln!("chatty ({})", model);
        eprintln!("{}", ui::PLAYGROUND_NOTICE);
        eprintln!();
    }

    if !unlock_plain(gate)? {
        return Ok(());
    }

    let history = session.messages().len();
    if history > 0 && io::stderr().is_terminal() {
        eprintln!("{} message(s) in history. /clear to start over.", history);
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim_end_matches(['\r', '\n']);
        if input.trim().is_empty() {
            continue;
        }

        if let Some(result) = execute_command(input) {
            match result {
                CommandResult::Clear => {
                    session.clear();
                    println!("Cleared conversation.");
                }
                CommandResult::Logout => {
                    gate.logout();
                    println!("Logged out.");
                    if !unlock_plain(gate)? {
                        break;
                    }
                }
                CommandResult::Exit => break,
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        println!();
        run_turn(session, input).await?;
        println!();
    }

    Ok(())
}
