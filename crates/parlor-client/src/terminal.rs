use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, Utc};
use uuid::Uuid;

use parlor_session::machine::Phase;
use parlor_session::render::{MessageView, ParticipantView, Presentation, RenderSurface};

/// View state shared between the render surface (owned by the session) and
/// the stdin parser, which needs the current phase to interpret input.
pub struct ViewState {
    pub phase: Phase,
    pub follow_tail: bool,
    pub roster: Vec<ParticipantView>,
    rows: Vec<MessageView>,
}

impl ViewState {
    fn new() -> Self {
        Self {
            phase: Phase::Loading,
            follow_tail: true,
            roster: Vec::new(),
            rows: Vec::new(),
        }
    }
}

/// Line-oriented terminal rendering of the session.
///
/// A terminal has no real scrollback control, so the near-bottom heuristic
/// maps onto a follow-tail flag the user toggles with `/follow`: while
/// following, new rows print as they arrive; while not, they accumulate
/// silently the way an unscrolled view would.
pub struct TerminalSurface {
    state: Arc<Mutex<ViewState>>,
}

impl TerminalSurface {
    pub fn new() -> (Self, Arc<Mutex<ViewState>>) {
        let state = Arc::new(Mutex::new(ViewState::new()));
        (Self { state: state.clone() }, state)
    }

    fn print_row(view: &MessageView) {
        let stamp = match view.timestamp {
            Some(ts) => local_clock(ts),
            None => "..:..".to_string(),
        };
        match view.presentation {
            Presentation::Event => println!("        -- {} --", view.text),
            Presentation::Own => println!("[{}]           you | {}", stamp, view.text),
            Presentation::Other => println!(
                "[{}] {:>13} | {}",
                stamp,
                view.sender_name.as_deref().unwrap_or("?"),
                view.text
            ),
        }
    }

    fn redraw(rows: &[MessageView]) {
        println!("----------------------------------------");
        for row in rows {
            Self::print_row(row);
        }
        println!("----------------------------------------");
    }
}

fn local_clock(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M").to_string()
}

impl RenderSurface for TerminalSurface {
    fn show_phase(&mut self, phase: Phase) {
        self.state.lock().unwrap().phase = phase;
        match phase {
            Phase::Loading => println!("(working...)"),
            Phase::RoomSelect => {
                println!("Enter a room and its password:  <room> <password>");
            }
            Phase::PasswordVerify => println!("Enter the room password:"),
            Phase::NameSelect => println!("Pick a display name:"),
            Phase::ActiveChat => {
                println!("You're in. Type to chat; /leave, /clear, /quit.");
            }
        }
    }

    fn show_error(&mut self, message: &str) {
        println!("! {}", message);
    }

    fn clear_error(&mut self) {}

    fn insert_message(&mut self, position: usize, view: MessageView) {
        let mut state = self.state.lock().unwrap();
        let at_end = position == state.rows.len();
        state.rows.insert(position, view);

        if !state.follow_tail {
            return;
        }
        if at_end {
            Self::print_row(&state.rows[position]);
        } else {
            // Out-of-order arrival landed mid-list: reprint the log
            Self::redraw(&state.rows);
        }
    }

    fn patch_timestamp(&mut self, id: Uuid, timestamp: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.rows.iter_mut().find(|r| r.id == id) {
            row.timestamp = Some(timestamp);
        }
        // No reprint: the pending stamp resolves quietly, like an in-place
        // DOM patch would.
    }

    fn remove_message(&mut self, id: Uuid) {
        let mut state = self.state.lock().unwrap();
        let before = state.rows.len();
        state.rows.retain(|r| r.id != id);
        if state.rows.len() != before && state.follow_tail {
            Self::redraw(&state.rows);
        }
    }

    fn clear_messages(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.rows.clear();
        println!("        -- (history cleared) --");
    }

    fn set_participants(&mut self, roster: &[ParticipantView]) {
        let mut state = self.state.lock().unwrap();
        state.roster = roster.to_vec();
        let names: Vec<String> = roster
            .iter()
            .map(|p| {
                if p.is_self {
                    format!("{} (you)", p.name)
                } else {
                    p.name.clone()
                }
            })
            .collect();
        println!("        == here now: {} ==", names.join(", "));
    }

    fn set_unseen(&mut self, count: u32) {
        // OSC 0 sets the terminal title, standing in for the tab title
        if count > 0 {
            print!("\x1b]0;({}) parlor\x07", count);
        } else {
            print!("\x1b]0;parlor\x07");
        }
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }

    fn near_bottom(&self) -> bool {
        self.state.lock().unwrap().follow_tail
    }

    fn scroll_to_bottom(&mut self) {}

    fn clear_input(&mut self) {}

    fn restore_input(&mut self, text: &str) {
        // No real input buffer to restore into; hand the text back instead
        println!("! your message was not sent, copy to retry: {}", text);
    }
}
