use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use parlor_session::machine::{Command, Phase};

use crate::terminal::ViewState;

/// Read stdin lines and translate them into session commands according to
/// the currently shown phase. Returns when stdin closes or `/quit` is
/// typed; dropping the sender is what shuts the session down.
pub async fn run(state: Arc<Mutex<ViewState>>, commands: mpsc::Sender<Command>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end().to_string();
        if line.is_empty() {
            continue;
        }

        let cmd = match line.as_str() {
            "/quit" => break,
            "/leave" => Some(Command::Leave),
            "/clear" => Some(Command::ClearHistory),
            "/focus on" => Some(Command::SetFocus { focused: true }),
            "/focus off" => Some(Command::SetFocus { focused: false }),
            "/follow on" | "/follow off" => {
                state.lock().unwrap().follow_tail = line.ends_with("on");
                None
            }
            "/who" => {
                let state = state.lock().unwrap();
                let names: Vec<String> = state.roster.iter().map(|p| p.name.clone()).collect();
                println!("        == here now: {} ==", names.join(", "));
                None
            }
            _ => phase_command(&state, line),
        };

        if let Some(cmd) = cmd {
            if commands.send(cmd).await.is_err() {
                break;
            }
        }
    }

    debug!("input loop finished");
    Ok(())
}

fn phase_command(state: &Arc<Mutex<ViewState>>, line: String) -> Option<Command> {
    let phase = state.lock().unwrap().phase;
    match phase {
        Phase::RoomSelect => {
            // "<room> <password>"; the password keeps any inner spaces
            let mut parts = line.splitn(2, char::is_whitespace);
            let slug = parts.next().unwrap_or_default().to_string();
            let password = parts.next().unwrap_or_default().trim_start().to_string();
            Some(Command::SubmitRoom { slug, password })
        }
        Phase::PasswordVerify => Some(Command::SubmitPassword { password: line }),
        Phase::NameSelect => Some(Command::SubmitName { name: line }),
        Phase::ActiveChat => Some(Command::SendMessage { text: line }),
        Phase::Loading => {
            println!("(still working, hold on)");
            None
        }
    }
}
