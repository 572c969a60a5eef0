use anyhow::anyhow;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use parlor_store::{FeedItem, LiveStore};
use parlor_types::events::{MessageChange, ParticipantSnapshot};
use parlor_types::models::{MessageKind, SYSTEM_SENDER};

use crate::context::{RoomSubscriptions, SessionContext};
use crate::error::SessionError;
use crate::nav::NavigationSignal;
use crate::notify::FocusTracker;
use crate::render::RenderSurface;
use crate::slug;

/// Messages deleted per atomic store batch during a history clear.
const CLEAR_CHUNK: usize = 500;

/// The five session phases. Exactly one is current at any time, and every
/// failure path resolves back into one of them — nothing strands the user
/// in `Loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    RoomSelect,
    PasswordVerify,
    NameSelect,
    ActiveChat,
}

/// User actions fed into the session from the front end.
#[derive(Debug, Clone)]
pub enum Command {
    SubmitRoom { slug: String, password: String },
    SubmitPassword { password: String },
    SubmitName { name: String },
    SendMessage { text: String },
    ClearHistory,
    Leave,
    SetFocus { focused: bool },
}

enum Wake {
    Nav,
    NavClosed,
    Command(Option<Command>),
    Messages(FeedItem<Vec<MessageChange>>),
    Participants(ParticipantSnapshot),
}

/// The session state machine: owns the current phase and room context,
/// drives both live subscriptions, and is the only writer of session state.
///
/// Runs as one logical thread: a single event loop suspends on the
/// navigation signal, the command channel, and the two feeds, and handles
/// one wake-up at a time, so no two transitions are ever in flight at once.
pub struct Session<R: RenderSurface> {
    store: LiveStore,
    client_id: String,
    nav: NavigationSignal,
    nav_rx: watch::Receiver<Option<String>>,
    surface: R,
    phase: Phase,
    ctx: Option<SessionContext>,
    focus: FocusTracker,
    /// One-shot: the next navigation change is the echo of our own token
    /// write and must be consumed without re-running the handler.
    suppress_nav_echo: bool,
    /// Bumped on every teardown; an in-flight operation that resumes under
    /// a different generation discards its result silently.
    generation: u64,
}

impl<R: RenderSurface> Session<R> {
    pub fn new(store: LiveStore, client_id: &str, nav: NavigationSignal, surface: R) -> Self {
        let nav_rx = nav.subscribe();
        Self {
            store,
            client_id: client_id.to_string(),
            nav,
            nav_rx,
            surface,
            phase: Phase::Loading,
            ctx: None,
            focus: FocusTracker::new(),
            suppress_nav_echo: false,
            generation: 0,
        }
    }

    /// Run until the command channel or the navigation signal closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> anyhow::Result<()> {
        // React to whatever token the signal already holds (direct entry
        // into a room via a shared link, or a plain start).
        self.handle_navigation().await;

        loop {
            let wake = {
                let nav_rx = &mut self.nav_rx;
                match self.ctx.as_mut().and_then(|c| c.subs.as_mut()) {
                    Some(subs) => tokio::select! {
                        changed = nav_rx.changed() => match changed {
                            Ok(()) => Wake::Nav,
                            Err(_) => Wake::NavClosed,
                        },
                        cmd = commands.recv() => Wake::Command(cmd),
                        item = subs.messages.next_batch() => Wake::Messages(item),
                        snapshot = subs.participants.next_snapshot() => Wake::Participants(snapshot),
                    },
                    None => tokio::select! {
                        changed = nav_rx.changed() => match changed {
                            Ok(()) => Wake::Nav,
                            Err(_) => Wake::NavClosed,
                        },
                        cmd = commands.recv() => Wake::Command(cmd),
                    },
                }
            };

            match wake {
                Wake::Nav => self.handle_navigation().await,
                Wake::NavClosed | Wake::Command(None) => {
                    info!("session shutting down");
                    return Ok(());
                }
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Messages(item) => self.handle_message_feed(item).await,
                Wake::Participants(snapshot) => self.handle_roster(snapshot),
            }
        }
    }

    // -- Navigation --

    async fn handle_navigation(&mut self) {
        let token = self.nav_rx.borrow_and_update().clone();

        if self.suppress_nav_echo {
            // The echo of a token we wrote ourselves; consume it once.
            self.suppress_nav_echo = false;
            debug!("suppressed self-navigation echo");
            return;
        }

        self.teardown();

        let Some(token) = token else {
            self.set_phase(Phase::RoomSelect);
            return;
        };

        info!("navigating into room '{}'", token);
        self.ctx = Some(SessionContext::new(&token));
        self.set_phase(Phase::Loading);

        let generation = self.generation;
        let exists = self.store.room_exists(&token).await;
        if self.generation != generation {
            debug!("discarding stale existence check for '{}'", token);
            return;
        }

        match exists {
            Ok(true) => self.set_phase(Phase::PasswordVerify),
            Ok(false) => self.room_not_found(&token),
            Err(e) => {
                error!("existence check for '{}' failed: {:#}", token, e);
                self.reset_to_room_select();
                self.surface.show_error(&SessionError::Store(e).user_message());
            }
        }
    }

    /// Direct navigation hit an unknown slug: surface it and fall back to
    /// the empty-token state.
    fn room_not_found(&mut self, slug: &str) {
        warn!("room '{}' not found", slug);
        self.reset_to_room_select();
        self.surface
            .show_error(&format!("Room '{}' was not found. You can create it from here.", slug));
    }

    /// Internal atomic transition back to room selection: tear down, align
    /// the navigation token (suppressing its echo), show the form.
    fn reset_to_room_select(&mut self) {
        self.teardown();
        if self.nav.get().is_some() {
            self.suppress_nav_echo = true;
            self.nav.set(None);
        }
        self.set_phase(Phase::RoomSelect);
    }

    /// Total teardown: dropping the context drops both watch handles, which
    /// unsubscribes synchronously — nothing can fire for the old room
    /// afterwards. The generation bump invalidates in-flight results.
    fn teardown(&mut self) {
        self.ctx = None;
        self.generation += 1;
        self.focus.reset();
        self.surface.set_unseen(0);
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.surface.show_phase(phase);
    }

    fn fail(&mut self, return_to: Phase, err: SessionError) {
        match &err {
            SessionError::Store(e) => error!("store failure: {:#}", e),
            other => debug!("rejected: {}", other),
        }
        self.surface.show_error(&err.user_message());
        self.set_phase(return_to);
    }

    // -- Commands --

    async fn handle_command(&mut self, cmd: Command) {
        match (cmd, self.phase) {
            (Command::SubmitRoom { slug, password }, Phase::RoomSelect) => {
                self.submit_room(slug, password).await
            }
            (Command::SubmitPassword { password }, Phase::PasswordVerify) => {
                self.submit_password(password).await
            }
            (Command::SubmitName { name }, Phase::NameSelect) => self.submit_name(name).await,
            (Command::SendMessage { text }, Phase::ActiveChat) => self.send_message(text).await,
            (Command::ClearHistory, Phase::ActiveChat) => self.clear_history().await,
            (Command::Leave, Phase::ActiveChat) => self.leave().await,
            (Command::SetFocus { focused }, _) => self.set_focus(focused),
            // Inputs for a phase that is no longer current are not
            // re-dispatchable; drop them.
            (cmd, phase) => debug!("ignoring {:?} while in {:?}", cmd, phase),
        }
    }

    async fn submit_room(&mut self, raw_slug: String, password: String) {
        self.surface.clear_error();

        let slug = slug::normalize(&raw_slug);
        if slug.is_empty() || password.is_empty() {
            self.fail(
                Phase::RoomSelect,
                SessionError::Validation("Room name and password are both required.".into()),
            );
            return;
        }

        self.set_phase(Phase::Loading);
        let generation = self.generation;
        let entered = self.enter_room(&slug, &password).await;
        if self.generation != generation {
            debug!("discarding stale room entry for '{}'", slug);
            return;
        }

        match entered {
            Ok(()) => {
                self.ctx = Some(SessionContext::new(&slug));
                // Reflect the room in the navigation token without
                // re-running the navigation handler on our own write.
                self.suppress_nav_echo = true;
                self.nav.set(Some(slug));
                self.set_phase(Phase::NameSelect);
            }
            Err(e) => self.fail(Phase::RoomSelect, e),
        }
    }

    /// Verify against an existing room's digest, or create the room with
    /// the submitted password's digest if the slug is unseen.
    async fn enter_room(&mut self, slug: &str, password: &str) -> Result<(), SessionError> {
        let digest = parlor_crypto::digest(password);

        if let Some(room) = self.store.read_room(slug).await? {
            return verify_digest(&room.password_digest, &digest);
        }

        match self.store.create_room(slug, &digest).await {
            Ok(_) => {
                info!("created room '{}'", slug);
                Ok(())
            }
            Err(create_err) => {
                // Either a lost create race or a real store failure; a
                // re-read distinguishes the two.
                match self.store.read_room(slug).await? {
                    Some(room) => verify_digest(&room.password_digest, &digest),
                    None => Err(SessionError::Store(anyhow!(
                        "create of room '{}' failed: {:#}",
                        slug,
                        create_err
                    ))),
                }
            }
        }
    }

    async fn submit_password(&mut self, password: String) {
        self.surface.clear_error();

        let Some(slug) = self.current_slug() else {
            self.fail(
                Phase::RoomSelect,
                SessionError::Validation("No room selected.".into()),
            );
            return;
        };
        if password.is_empty() {
            self.fail(
                Phase::PasswordVerify,
                SessionError::Validation("Password is required.".into()),
            );
            return;
        }

        self.set_phase(Phase::Loading);
        let generation = self.generation;
        let digest = parlor_crypto::digest(&password);
        let room = self.store.read_room(&slug).await;
        if self.generation != generation {
            debug!("discarding stale password check for '{}'", slug);
            return;
        }

        match room {
            Ok(Some(room)) => match verify_digest(&room.password_digest, &digest) {
                Ok(()) => self.set_phase(Phase::NameSelect),
                Err(e) => self.fail(Phase::PasswordVerify, e),
            },
            Ok(None) => self.room_not_found(&slug),
            Err(e) => self.fail(Phase::PasswordVerify, SessionError::Store(e)),
        }
    }

    async fn submit_name(&mut self, raw_name: String) {
        self.surface.clear_error();

        let name = raw_name.trim().to_string();
        let Some(slug) = self.current_slug() else {
            self.fail(
                Phase::RoomSelect,
                SessionError::Validation("No room selected.".into()),
            );
            return;
        };
        if name.is_empty() {
            self.fail(
                Phase::NameSelect,
                SessionError::Validation("Display name is required.".into()),
            );
            return;
        }

        self.set_phase(Phase::Loading);
        let generation = self.generation;
        let claimed = self.claim_name(&slug, &name).await;
        if self.generation != generation {
            debug!("discarding stale name claim for '{}'", slug);
            return;
        }

        match claimed {
            Ok(effective_name) => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.name = Some(effective_name);
                }
                self.set_phase(Phase::ActiveChat);
                self.open_subscriptions(&slug).await;
            }
            Err(e) => self.fail(Phase::NameSelect, e),
        }
    }

    /// Claim a display name in the room. Returns the name that actually
    /// applies: a rejoining client keeps its stored name and only has its
    /// joined-at refreshed — no second join event, ever.
    async fn claim_name(&mut self, slug: &str, name: &str) -> Result<String, SessionError> {
        let participants = self.store.list_participants(slug).await?;

        let taken = participants
            .iter()
            .any(|p| p.client_id != self.client_id && p.name.to_lowercase() == name.to_lowercase());
        if taken {
            return Err(SessionError::Validation(format!(
                "The name '{}' is already in use in this room.",
                name
            )));
        }

        if let Some(existing) = participants.iter().find(|p| p.client_id == self.client_id) {
            self.store.touch_participant(slug, &self.client_id).await?;
            debug!("rejoined '{}' as '{}'", slug, existing.name);
            return Ok(existing.name.clone());
        }

        self.store.upsert_participant(slug, &self.client_id, name).await?;
        self.store
            .append_message(
                slug,
                MessageKind::Event,
                &format!("{} has joined the room.", name),
                SYSTEM_SENDER,
                None,
            )
            .await?;
        Ok(name.to_string())
    }

    /// Start both live feeds. On failure the chat stays up with whatever
    /// was rendered before: the error is logged and surfaced, nothing
    /// retries.
    async fn open_subscriptions(&mut self, slug: &str) {
        let generation = self.generation;
        let messages = self.store.watch_messages(slug).await;
        let participants = self.store.watch_participants(slug).await;
        if self.generation != generation {
            debug!("discarding stale subscriptions for '{}'", slug);
            return;
        }

        match (messages, participants) {
            (Ok(messages), Ok(participants)) => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.subs = Some(RoomSubscriptions::new(messages, participants, &self.client_id));
                }
            }
            (messages, participants) => {
                for e in [messages.err(), participants.err()].into_iter().flatten() {
                    error!("subscribe on '{}' failed: {:#}", slug, e);
                }
                self.surface
                    .show_error(&SessionError::Store(anyhow!("subscription failed")).user_message());
            }
        }
    }

    /// Write-then-observe-echo: the text reaches the store and comes back
    /// through the message feed; nothing is rendered locally here. Only the
    /// input field is touched — cleared optimistically, restored on
    /// failure so the user can retry.
    async fn send_message(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let Some((slug, name)) = self.current_identity() else {
            return;
        };

        self.surface.clear_input();
        let sent = self
            .store
            .append_message(&slug, MessageKind::User, &text, &self.client_id, Some(&name))
            .await;

        if let Err(e) = sent {
            error!("send to '{}' failed: {:#}", slug, e);
            self.surface.restore_input(&text);
            self.surface.show_error(&SessionError::Store(e).user_message());
        }
    }

    /// Delete the room's entire history in atomic chunks, clear the local
    /// view immediately (the one deliberate exception to observing our own
    /// echo — an emptied room should not flicker through hundreds of
    /// row removals), then announce the clear.
    async fn clear_history(&mut self) {
        let Some((slug, name)) = self.current_identity() else {
            return;
        };

        let generation = self.generation;
        let ids = match self.store.list_message_ids(&slug).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("history enumeration for '{}' failed: {:#}", slug, e);
                self.surface.show_error(&SessionError::Store(e).user_message());
                return;
            }
        };
        if self.generation != generation {
            return;
        }

        info!("clearing {} messages in '{}'", ids.len(), slug);
        for chunk in ids.chunks(CLEAR_CHUNK) {
            if let Err(e) = self.store.delete_messages_batch(&slug, chunk).await {
                error!("history clear for '{}' failed mid-way: {:#}", slug, e);
                self.surface.show_error(&SessionError::Store(e).user_message());
                return;
            }
            if self.generation != generation {
                return;
            }
        }

        if let Some(subs) = self.ctx.as_mut().and_then(|c| c.subs.as_mut()) {
            subs.reconciler.clear_local(&mut self.surface);
        }

        let announced = self
            .store
            .append_message(
                &slug,
                MessageKind::Event,
                &format!("{} cleared the chat history.", name),
                SYSTEM_SENDER,
                None,
            )
            .await;
        if let Err(e) = announced {
            error!("clear announcement for '{}' failed: {:#}", slug, e);
        }
    }

    /// Remove our participant record, announce the departure, then take the
    /// internal route back to room selection (standard teardown included).
    async fn leave(&mut self) {
        let Some((slug, name)) = self.current_identity() else {
            return;
        };

        if let Err(e) = self.store.delete_participant(&slug, &self.client_id).await {
            error!("leave of '{}' failed: {:#}", slug, e);
            self.surface.show_error(&SessionError::Store(e).user_message());
            return;
        }

        let announced = self
            .store
            .append_message(
                &slug,
                MessageKind::Event,
                &format!("{} has left the room.", name),
                SYSTEM_SENDER,
                None,
            )
            .await;
        if let Err(e) = announced {
            error!("leave announcement for '{}' failed: {:#}", slug, e);
        }

        info!("left room '{}'", slug);
        self.reset_to_room_select();
    }

    fn set_focus(&mut self, focused: bool) {
        if let Some(count) = self.focus.set_focus(focused) {
            self.surface.set_unseen(count);
        }
    }

    // -- Feeds --

    async fn handle_message_feed(&mut self, item: FeedItem<Vec<MessageChange>>) {
        match item {
            FeedItem::Item(batch) => {
                let from_others = {
                    let Some(subs) = self.ctx.as_mut().and_then(|c| c.subs.as_mut()) else {
                        return;
                    };
                    subs.reconciler.apply_batch(batch, &mut self.surface).from_others
                };
                if let Some(count) = self.focus.record_incoming(from_others) {
                    self.surface.set_unseen(count);
                }
            }
            FeedItem::Lagged { skipped } => {
                warn!("message feed lagged ({} batches dropped), resynchronizing", skipped);
                self.resync_messages().await;
            }
        }
    }

    /// Rebuild the message view from a direct read after feed loss.
    async fn resync_messages(&mut self) {
        let Some(slug) = self.current_slug() else {
            return;
        };

        let generation = self.generation;
        match self.store.list_messages(&slug).await {
            Ok(records) if self.generation == generation => {
                if let Some(subs) = self.ctx.as_mut().and_then(|c| c.subs.as_mut()) {
                    subs.reconciler.resync(records, &mut self.surface);
                }
            }
            Ok(_) => debug!("discarding stale resync for '{}'", slug),
            Err(e) => error!("resync of '{}' failed: {:#}", slug, e),
        }
    }

    fn handle_roster(&mut self, snapshot: ParticipantSnapshot) {
        let views = {
            let Some(subs) = self.ctx.as_mut().and_then(|c| c.subs.as_mut()) else {
                return;
            };
            subs.presence.rebuild(snapshot);
            subs.presence.views(&self.client_id)
        };
        self.surface.set_participants(&views);
    }

    // -- Context accessors --

    fn current_slug(&self) -> Option<String> {
        self.ctx.as_ref().map(|c| c.slug.clone())
    }

    fn current_identity(&self) -> Option<(String, String)> {
        let ctx = self.ctx.as_ref()?;
        Some((ctx.slug.clone(), ctx.name.clone()?))
    }
}

fn verify_digest(stored: &str, candidate: &str) -> Result<(), SessionError> {
    if stored == candidate {
        Ok(())
    } else {
        Err(SessionError::Conflict("Incorrect password for this room.".into()))
    }
}
