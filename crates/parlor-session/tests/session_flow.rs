//! End-to-end session flows: two clients sharing one live store, driven
//! through the command channel and observed through a recording surface.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use parlor_db::Database;
use parlor_session::machine::{Command, Phase, Session};
use parlor_session::nav::NavigationSignal;
use parlor_session::render::{MessageView, ParticipantView, RenderSurface};
use parlor_store::LiveStore;

#[derive(Default)]
struct Recorded {
    phases: Vec<Phase>,
    errors: Vec<String>,
    rows: Vec<MessageView>,
    roster: Vec<ParticipantView>,
    unseen: Vec<u32>,
    inputs_cleared: usize,
    inputs_restored: Vec<String>,
}

impl Recorded {
    fn phase(&self) -> Option<Phase> {
        self.phases.last().copied()
    }

    fn texts(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.text.clone()).collect()
    }
}

#[derive(Clone)]
struct TestSurface(Arc<Mutex<Recorded>>);

impl TestSurface {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Recorded::default())))
    }
}

impl RenderSurface for TestSurface {
    fn show_phase(&mut self, phase: Phase) {
        self.0.lock().unwrap().phases.push(phase);
    }

    fn show_error(&mut self, message: &str) {
        self.0.lock().unwrap().errors.push(message.to_string());
    }

    fn clear_error(&mut self) {}

    fn insert_message(&mut self, position: usize, view: MessageView) {
        self.0.lock().unwrap().rows.insert(position, view);
    }

    fn patch_timestamp(&mut self, id: Uuid, timestamp: DateTime<Utc>) {
        let mut rec = self.0.lock().unwrap();
        if let Some(row) = rec.rows.iter_mut().find(|r| r.id == id) {
            row.timestamp = Some(timestamp);
        }
    }

    fn remove_message(&mut self, id: Uuid) {
        self.0.lock().unwrap().rows.retain(|r| r.id != id);
    }

    fn clear_messages(&mut self) {
        self.0.lock().unwrap().rows.clear();
    }

    fn set_participants(&mut self, roster: &[ParticipantView]) {
        self.0.lock().unwrap().roster = roster.to_vec();
    }

    fn set_unseen(&mut self, count: u32) {
        self.0.lock().unwrap().unseen.push(count);
    }

    fn near_bottom(&self) -> bool {
        true
    }

    fn scroll_to_bottom(&mut self) {}

    fn clear_input(&mut self) {
        self.0.lock().unwrap().inputs_cleared += 1;
    }

    fn restore_input(&mut self, text: &str) {
        self.0.lock().unwrap().inputs_restored.push(text.to_string());
    }
}

struct Client {
    commands: mpsc::Sender<Command>,
    nav: NavigationSignal,
    recorded: Arc<Mutex<Recorded>>,
}

impl Client {
    fn start(store: &LiveStore, client_id: &str, initial_room: Option<&str>) -> Self {
        let nav = NavigationSignal::new(initial_room.map(str::to_string));
        let surface = TestSurface::new();
        let recorded = surface.0.clone();
        let (tx, rx) = mpsc::channel(64);

        let session = Session::new(store.clone(), client_id, nav.clone(), surface);
        tokio::spawn(session.run(rx));

        Self {
            commands: tx,
            nav,
            recorded,
        }
    }

    async fn send(&self, cmd: Command) {
        self.commands.send(cmd).await.expect("session gone");
    }

    fn with_recorded<T>(&self, f: impl FnOnce(&Recorded) -> T) -> T {
        f(&self.recorded.lock().unwrap())
    }

    async fn wait_until(&self, what: &str, f: impl Fn(&Recorded) -> bool) {
        for _ in 0..400 {
            if self.with_recorded(&f) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for: {}", what);
    }

    async fn wait_for_phase(&self, phase: Phase) {
        self.wait_until(&format!("phase {:?}", phase), |r| r.phase() == Some(phase))
            .await;
    }

    /// Drive this client from room selection all the way into the chat.
    async fn join(&self, slug: &str, password: &str, name: &str) {
        self.wait_for_phase(Phase::RoomSelect).await;
        self.send(Command::SubmitRoom {
            slug: slug.into(),
            password: password.into(),
        })
        .await;
        self.wait_for_phase(Phase::NameSelect).await;
        self.send(Command::SubmitName { name: name.into() }).await;
        self.wait_for_phase(Phase::ActiveChat).await;
    }
}

fn fresh_store() -> LiveStore {
    LiveStore::new(Database::open_in_memory().unwrap())
}

#[tokio::test]
async fn create_flow_reaches_chat_and_announces_join() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);

    alice.join("team-x", "hunter2", "Alice").await;

    alice
        .wait_until("join event rendered", |r| {
            r.texts().contains(&"Alice has joined the room.".to_string())
        })
        .await;

    // Self-navigation reflected in the token without bouncing the machine
    assert_eq!(alice.nav.get(), Some("team-x".to_string()));
    alice.with_recorded(|r| {
        assert_eq!(r.phase(), Some(Phase::ActiveChat));
        assert!(r.errors.is_empty(), "unexpected errors: {:?}", r.errors);
    });
}

#[tokio::test]
async fn slug_is_normalized_on_submission() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);

    alice.join("Team X!", "pw", "Alice").await;

    assert_eq!(alice.nav.get(), Some("teamx".to_string()));
    assert!(store.room_exists("teamx").await.unwrap());
}

#[tokio::test]
async fn empty_inputs_are_rejected_inline() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);
    alice.wait_for_phase(Phase::RoomSelect).await;

    alice
        .send(Command::SubmitRoom {
            slug: "!!!".into(), // normalizes to empty
            password: "pw".into(),
        })
        .await;

    alice
        .wait_until("validation error", |r| !r.errors.is_empty())
        .await;
    alice.with_recorded(|r| assert_eq!(r.phase(), Some(Phase::RoomSelect)));
    assert!(!store.room_exists("").await.unwrap());
}

#[tokio::test]
async fn password_is_case_sensitive_on_direct_navigation() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);
    alice.join("team-x", "hunter2", "Alice").await;

    // Bob opens the room link directly and lands on password entry
    let bob = Client::start(&store, "client-b", Some("team-x"));
    bob.wait_for_phase(Phase::PasswordVerify).await;

    bob.send(Command::SubmitPassword {
        password: "HUNTER2".into(),
    })
    .await;
    bob.wait_until("password rejection", |r| {
        r.errors.iter().any(|e| e.contains("Incorrect password"))
    })
    .await;
    bob.with_recorded(|r| assert_eq!(r.phase(), Some(Phase::PasswordVerify)));

    bob.send(Command::SubmitPassword {
        password: "hunter2".into(),
    })
    .await;
    bob.wait_for_phase(Phase::NameSelect).await;
}

#[tokio::test]
async fn wrong_password_on_room_select_returns_to_form() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);
    alice.join("team-x", "hunter2", "Alice").await;

    let bob = Client::start(&store, "client-b", None);
    bob.wait_for_phase(Phase::RoomSelect).await;
    bob.send(Command::SubmitRoom {
        slug: "team-x".into(),
        password: "letmein".into(),
    })
    .await;

    bob.wait_until("password rejection", |r| {
        r.errors.iter().any(|e| e.contains("Incorrect password"))
    })
    .await;
    bob.with_recorded(|r| assert_eq!(r.phase(), Some(Phase::RoomSelect)));
}

#[tokio::test]
async fn display_names_are_unique_case_insensitively() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);
    alice.join("team-x", "pw", "Alice").await;

    let bob = Client::start(&store, "client-b", None);
    bob.wait_for_phase(Phase::RoomSelect).await;
    bob.send(Command::SubmitRoom {
        slug: "team-x".into(),
        password: "pw".into(),
    })
    .await;
    bob.wait_for_phase(Phase::NameSelect).await;

    bob.send(Command::SubmitName { name: "alice".into() }).await;
    bob.wait_until("name rejection", |r| {
        r.errors.iter().any(|e| e.contains("already in use"))
    })
    .await;
    bob.with_recorded(|r| assert_eq!(r.phase(), Some(Phase::NameSelect)));

    bob.send(Command::SubmitName { name: "Alicia".into() }).await;
    bob.wait_for_phase(Phase::ActiveChat).await;
}

#[tokio::test]
async fn rejoin_refreshes_without_second_join_event() {
    let store = fresh_store();

    {
        let alice = Client::start(&store, "client-a", None);
        alice.join("team-x", "pw", "Alice").await;
    }

    // Same identity, fresh session (a restart)
    let alice_again = Client::start(&store, "client-a", Some("team-x"));
    alice_again.wait_for_phase(Phase::PasswordVerify).await;
    alice_again
        .send(Command::SubmitPassword { password: "pw".into() })
        .await;
    alice_again.wait_for_phase(Phase::NameSelect).await;
    alice_again
        .send(Command::SubmitName { name: "Alice".into() })
        .await;
    alice_again.wait_for_phase(Phase::ActiveChat).await;

    let joins = store
        .list_messages("team-x")
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.text == "Alice has joined the room.")
        .count();
    assert_eq!(joins, 1, "rejoin must not emit a second join event");

    // Still exactly one participant record for the identity
    let participants = store.list_participants("team-x").await.unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].name, "Alice");
}

#[tokio::test]
async fn sent_message_echoes_back_and_timestamp_confirms() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);
    alice.join("team-x", "pw", "Alice").await;

    alice.send(Command::SendMessage { text: "hi".into() }).await;

    alice
        .wait_until("message confirmed", |r| {
            r.rows
                .iter()
                .any(|row| row.text == "hi" && row.timestamp.is_some())
        })
        .await;

    alice.with_recorded(|r| {
        // Echoed once, not duplicated by the confirmation
        assert_eq!(r.rows.iter().filter(|row| row.text == "hi").count(), 1);
        assert!(r.inputs_cleared >= 1);
        assert!(r.inputs_restored.is_empty());
    });
}

#[tokio::test]
async fn messages_flow_between_clients_and_count_unseen() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);
    alice.join("team-x", "pw", "Alice").await;

    let bob = Client::start(&store, "client-b", None);
    bob.join("team-x", "pw", "Bob").await;

    alice
        .wait_until("bob's join visible", |r| {
            r.texts().contains(&"Bob has joined the room.".to_string())
        })
        .await;

    // Alice looks away; Bob talks
    alice.send(Command::SetFocus { focused: false }).await;
    bob.send(Command::SendMessage { text: "one".into() }).await;
    bob.send(Command::SendMessage { text: "two".into() }).await;

    alice
        .wait_until("unseen reaches 2", |r| r.unseen.last() == Some(&2))
        .await;

    // Focus regained clears the counter
    alice.send(Command::SetFocus { focused: true }).await;
    alice
        .wait_until("unseen reset", |r| r.unseen.last() == Some(&0))
        .await;

    // Wait out the timestamp confirmations so ordering is final
    alice
        .wait_until("both messages confirmed", |r| {
            ["one", "two"].iter().all(|t| {
                r.rows.iter().any(|row| row.text == *t && row.timestamp.is_some())
            })
        })
        .await;

    alice.with_recorded(|r| {
        let texts = r.texts();
        let one = texts.iter().position(|t| t == "one").unwrap();
        let two = texts.iter().position(|t| t == "two").unwrap();
        assert!(one < two, "messages out of order: {:?}", texts);
    });
}

#[tokio::test]
async fn roster_tracks_joins_and_leaves() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);
    alice.join("team-x", "pw", "Alice").await;

    alice
        .wait_until("own roster entry", |r| r.roster.len() == 1)
        .await;

    let bob = Client::start(&store, "client-b", None);
    bob.join("team-x", "pw", "Bob").await;

    alice
        .wait_until("roster of two", |r| {
            r.roster.iter().map(|p| p.name.as_str()).collect::<Vec<_>>() == vec!["Alice", "Bob"]
        })
        .await;

    bob.send(Command::Leave).await;
    bob.wait_for_phase(Phase::RoomSelect).await;
    assert_eq!(bob.nav.get(), None);

    alice
        .wait_until("roster back to one", |r| r.roster.len() == 1)
        .await;
    alice
        .wait_until("leave event visible", |r| {
            r.texts().contains(&"Bob has left the room.".to_string())
        })
        .await;

    assert!(store.get_participant("team-x", "client-b").await.unwrap().is_none());
}

#[tokio::test]
async fn clear_history_empties_room_and_announces_once() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);
    alice.join("team-x", "pw", "Alice").await;

    for text in ["a", "b", "c"] {
        alice.send(Command::SendMessage { text: text.into() }).await;
    }
    // Wait for commits, not just the optimistic echoes, so the clear
    // enumerates every message
    alice
        .wait_until("all sends confirmed", |r| {
            ["a", "b", "c"].iter().all(|t| {
                r.rows.iter().any(|row| row.text == *t && row.timestamp.is_some())
            })
        })
        .await;

    alice.send(Command::ClearHistory).await;

    alice
        .wait_until("cleared view", |r| {
            let texts = r.texts();
            texts.iter().any(|t| t.contains("cleared the chat history"))
                && !texts.iter().any(|t| ["a", "b", "c"].contains(&t.as_str()))
        })
        .await;

    // The store agrees: exactly the one announcement survives
    let remaining = store.list_messages("team-x").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].text.contains("cleared the chat history"));
}

#[tokio::test]
async fn unknown_room_link_resets_to_room_select() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", Some("unknown-room"));

    alice
        .wait_until("not-found surfaced", |r| {
            r.errors.iter().any(|e| e.contains("was not found"))
        })
        .await;

    alice.with_recorded(|r| assert_eq!(r.phase(), Some(Phase::RoomSelect)));
    assert_eq!(alice.nav.get(), None);
}

#[tokio::test]
async fn external_navigation_to_empty_tears_down_mid_chat() {
    let store = fresh_store();
    let alice = Client::start(&store, "client-a", None);
    alice.join("team-x", "pw", "Alice").await;

    // Browser-back analogue: the token empties from outside the session
    alice.nav.set(None);
    alice.wait_for_phase(Phase::RoomSelect).await;

    // Feeds are gone: a message sent by someone else is not rendered
    let bob = Client::start(&store, "client-b", None);
    bob.join("team-x", "pw", "Bob").await;
    bob.send(Command::SendMessage { text: "anyone?".into() }).await;
    bob.wait_until("bob sees own message", |r| r.texts().contains(&"anyone?".to_string()))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    alice.with_recorded(|r| {
        assert!(
            !r.texts().contains(&"anyone?".to_string()),
            "stale subscription delivered after teardown"
        );
    });
}
