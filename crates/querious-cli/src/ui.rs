//! Interactive terminal helpers

use colored::*;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, size},
};
use std::io::{self, IsTerminal, Write};

use querious_core::Result;

const PROMPT: &str = "you>";

/// Banner shown when an interactive chat starts
pub fn display_banner(chat_title: &str) {
    let terminal_width = size().map(|(w, _)| w as usize).unwrap_or(80);
    let width = 60usize.min(terminal_width.saturating_sub(4)).max(20);
    let inner = width - 2;

    let pad = |text: &str| {
        let len = text.chars().count();
        format!("│ {}{}│", text, " ".repeat(inner.saturating_sub(len + 1)))
    };

    println!();
    println!("{}", format!("┌{}┐", "─".repeat(inner)).blue());
    println!("{}", pad("Querious").blue().bold());
    println!("{}", pad(chat_title).blue());
    println!("{}", pad("").blue());
    println!("{}", pad("Ask questions about the documents in this chat.").blue());
    println!("{}", pad("↑/↓ history  •  /help for commands").blue());
    println!("{}", format!("└{}┘", "─".repeat(inner)).blue());
    println!();
}

/// Commands understood by the chat loop
pub fn print_help() {
    println!("{}", "Chat commands:".bold());
    println!("  {} - Ask a question about your documents", "<question>".green());
    println!("  {} - Show the questions and answers so far", "/history".green());
    println!("  {} - Forget the conversation history", "/clear".green());
    println!("  {} - Show this help message", "/help".green());
    println!("  {} - Leave the chat", "exit/quit".green());
}

fn redraw(input: &str) -> io::Result<()> {
    print!("\r\x1b[2K{} {}", PROMPT.green().bold(), input);
    io::stdout().flush()
}

/// Read one line, with ↑/↓ navigating previous entries
///
/// Falls back to a plain line read when stdin is not a terminal. Returns
/// `None` on end of input or Ctrl-D.
pub fn handle_input_with_history(history: &mut Vec<String>) -> Result<Option<String>> {
    if !io::stdin().is_terminal() {
        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        let input = input.trim().to_string();
        if !input.is_empty() {
            history.push(input.clone());
        }
        return Ok(Some(input));
    }

    enable_raw_mode()?;
    let outcome = read_line_raw(history);
    disable_raw_mode()?;
    println!();

    let line = outcome?;
    if let Some(input) = &line {
        if !input.is_empty() {
            history.push(input.clone());
        }
    }
    Ok(line)
}

fn read_line_raw(history: &[String]) -> Result<Option<String>> {
    let mut input = String::new();
    let mut history_index: Option<usize> = None;

    redraw(&input)?;

    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        match key.code {
            KeyCode::Enter => return Ok(Some(input.trim().to_string())),
            KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(None);
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(None);
            }
            KeyCode::Char(c) => {
                input.push(c);
                redraw(&input)?;
            }
            KeyCode::Backspace => {
                input.pop();
                redraw(&input)?;
            }
            KeyCode::Up if !history.is_empty() => {
                let index = match history_index {
                    None => history.len() - 1,
                    Some(i) => i.saturating_sub(1),
                };
                history_index = Some(index);
                input = history[index].clone();
                redraw(&input)?;
            }
            KeyCode::Down => {
                if let Some(i) = history_index {
                    if i + 1 < history.len() {
                        history_index = Some(i + 1);
                        input = history[i + 1].clone();
                    } else {
                        history_index = None;
                        input.clear();
                    }
                    redraw(&input)?;
                }
            }
            KeyCode::Esc => {
                input.clear();
                history_index = None;
                redraw(&input)?;
            }
            _ => {}
        }
    }
}

/// Ask a yes/no question; Enter means yes
pub fn confirm(question: &str) -> Result<bool> {
    print!("{} {} [Y/n]: ", "❓".cyan(), question);
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    let response = response.trim().to_lowercase();

    Ok(response.is_empty() || response == "y" || response == "yes")
}

/// Read a password without echo when attached to a terminal
pub fn prompt_secret(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;

    if !io::stdin().is_terminal() {
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }

    enable_raw_mode()?;
    let mut secret = String::new();
    let outcome = loop {
        match event::read() {
            Ok(Event::Key(key)) => match key.code {
                KeyCode::Enter => break Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    secret.clear();
                    break Ok(());
                }
                KeyCode::Char(c) => secret.push(c),
                KeyCode::Backspace => {
                    secret.pop();
                }
                _ => {}
            },
            Ok(_) => {}
            Err(e) => break Err(e),
        }
    };
    disable_raw_mode()?;
    println!();
    outcome?;
    Ok(secret)
}

/// Read a visible line
pub fn prompt_line(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
