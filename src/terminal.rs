//! Terminal surface: chat lines on stdout, commands and messages on stdin.
//!
//! Voice is driven by a [`ScriptedRecognizer`]: `/listen` toggles recording
//! and `/say <words>` delivers a transcript as if it had been spoken.
//! `/volume <0-1>` stands in for the microphone level meter.

use colored::*;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::app::ChatApp;
use crate::chat_log::ChatEntry;
use crate::config::SimConfig;
use crate::emotes::render_plain;
use crate::error::Result;
use crate::state::ChatEvent;
use crate::voice::{ScriptedRecognizer, SpeechRecognizer};

pub const HELP: &str = "commands: /clear  /spam  /category <name>  /speed <0-100>  /volume <0-1>  /listen  /say <words>  /help  /quit\nanything else is posted to chat";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Clear,
    ToggleSpam,
    Category(String),
    Speed(i64),
    /// Microphone level in `[0, 1]`.
    Volume(f64),
    Listen,
    Say(String),
    Help,
    Quit,
    Chat(String),
    /// Recognized command with bad arguments.
    Invalid(String),
}

/// Interpret one stdin line. Lines not starting with a known command are chat.
pub fn parse_command(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "/clear" => Command::Clear,
        "/spam" => Command::ToggleSpam,
        "/listen" => Command::Listen,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        "/category" if rest.is_empty() => Command::Invalid("usage: /category <name>".to_string()),
        "/category" => Command::Category(rest.to_string()),
        "/speed" => match rest.parse::<i64>() {
            Ok(speed) => Command::Speed(speed),
            Err(_) => Command::Invalid("usage: /speed <0-100>".to_string()),
        },
        "/volume" => match rest.parse::<f64>() {
            Ok(level) => Command::Volume(level),
            Err(_) => Command::Invalid("usage: /volume <0-1>".to_string()),
        },
        "/say" if rest.is_empty() => Command::Invalid("usage: /say <words>".to_string()),
        "/say" => Command::Say(rest.to_string()),
        _ => Command::Chat(line.to_string()),
    }
}

fn paint(name: &str, color: &str) -> ColoredString {
    match color {
        "red" => name.red(),
        "green" => name.green(),
        "teal" => name.cyan(),
        "blue" => name.blue(),
        "purple" => name.magenta(),
        "yellow" => name.yellow(),
        _ => name.normal(),
    }
    .bold()
}

/// `username: message` with emotes shown as `:token:`.
pub fn render_line(entry: &ChatEntry) -> String {
    format!(
        "{}: {}",
        paint(&entry.username, &entry.color),
        render_plain(&entry.segments)
    )
}

/// Text to print for an event, if it is worth a line.
pub fn describe(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::Append { entry } => Some(render_line(entry)),
        ChatEvent::Clear => Some("-- chat cleared --".dimmed().to_string()),
        ChatEvent::Spam { spam } => {
            let state = if spam.enabled { "on" } else { "off" };
            Some(
                format!(
                    "-- spam {state}, category {}, speed {} --",
                    spam.category, spam.speed
                )
                .dimmed()
                .to_string(),
            )
        }
        ChatEvent::Voice { voice } => Some(format!("-- voice {} --", voice.output).dimmed().to_string()),
        ChatEvent::Trim { .. } | ChatEvent::Recognizer { .. } | ChatEvent::Snapshot { .. } => None,
    }
}

async fn print_events(mut rx: broadcast::Receiver<ChatEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "terminal fell behind the chat"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Build an app whose recognizer is scripted from the terminal.
pub fn build_app(config: &SimConfig, seed: Option<u64>) -> (ChatApp, ScriptedRecognizer) {
    let slot = Arc::new(Mutex::new(None));
    let captured = slot.clone();
    let app = ChatApp::new(config, seed, move |link| {
        let recognizer = ScriptedRecognizer::new(link);
        if let Ok(mut slot) = captured.lock() {
            *slot = Some(recognizer.clone());
        }
        Box::new(recognizer) as Box<dyn SpeechRecognizer>
    });
    let script = slot
        .lock()
        .ok()
        .and_then(|mut slot| slot.take())
        .unwrap_or_else(|| ScriptedRecognizer::new(app.recognizer_link()));
    (app, script)
}

/// Apply one command. Returns false when the session should end.
pub fn execute(app: &ChatApp, script: &ScriptedRecognizer, command: Command) -> bool {
    match command {
        Command::Clear => app.clear(),
        Command::ToggleSpam => {
            app.toggle_spam();
        }
        Command::Category(name) => {
            if let Err(e) = app.set_category(&name) {
                eprintln!("{}", e.to_string().red());
            }
        }
        Command::Speed(speed) => {
            if let Err(e) = app.set_speed(speed) {
                eprintln!("{}", e.to_string().red());
            }
        }
        Command::Volume(level) => {
            if let Err(e) = app.set_volume(level) {
                eprintln!("{}", e.to_string().red());
            }
        }
        Command::Listen => {
            if let Err(e) = app.toggle_recording() {
                eprintln!("{}", e.to_string().red());
            }
        }
        Command::Say(words) => {
            if !script.hear(&words) {
                eprintln!("{}", "not listening; use /listen first".yellow());
            }
        }
        Command::Help => eprintln!("{HELP}"),
        Command::Quit => return false,
        Command::Chat(text) => {
            app.submit_text(&text);
        }
        Command::Invalid(usage) => eprintln!("{}", usage.yellow()),
    }
    true
}

/// Read stdin until EOF or `/quit`, printing chat as it happens.
pub async fn run(app: Arc<ChatApp>, script: ScriptedRecognizer) -> Result<()> {
    let printer = tokio::spawn(print_events(app.subscribe()));
    eprintln!("{}", HELP.bright_blue());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !execute(&app, &script, parse_command(&line)) {
            break;
        }
    }

    app.stop_spam();
    printer.abort();
    info!("terminal session ended");
    Ok(())
}
