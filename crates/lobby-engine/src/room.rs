//! The chat room: one owner for every piece of room state.
//!
//! `ChatRoom` is not shared. A single task drives it, calling one handler at a
//! time, so nothing in here locks. Outbound traffic goes through the
//! [`Transport`], which never blocks.

use std::sync::Arc;

use lobby_core::errors::{Rejection, RoomError, Violation};
use lobby_core::ids::{ConnId, SessionId};
use lobby_core::messages::{ChatMessage, ClientEvent, CloseCause, ServerEvent};
use lobby_core::transport::Transport;
use lobby_settings::BadWords;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::abuse::AbuseControl;
use crate::automod::{AutoModState, Verdict};
use crate::config::{
    RoomConfig, DUPLICATE_WINDOW_MS, MESSAGE_BURST_MS, PULSE_GRACE_MS, WELCOME_SENDER,
};
use crate::filter;
use crate::history::ChatHistory;
use crate::registry::{Session, SessionRegistry};

const SHOUT_WARNING: (&str, &str) = ("Downstairs Dave", "please don't shout");
const SPAM_WARNING: (&str, &str) = ("Bob", "please be respectful and take care not to spam");

/// Why a chat message was dropped without disconnecting its sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    Burst,
    Duplicate,
    Violation(Violation),
}

/// Result of handling one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Broadcast and stored.
    Accepted(ChatMessage),
    Dropped(DropReason),
    /// Sender was disconnected with `kick`.
    Kicked(RoomError),
    HistorySent,
    /// Nothing to do: keep-alive, unknown event, or unknown connection.
    Ignored,
}

/// Snapshot served on `/health`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub online: usize,
    pub capacity: usize,
    pub ceiling: usize,
    pub chaos: u32,
    pub filter_level: u8,
    pub history: usize,
    pub tracked_addresses: usize,
}

pub struct ChatRoom {
    config: RoomConfig,
    words: Arc<BadWords>,
    transport: Arc<dyn Transport>,
    registry: SessionRegistry,
    abuse: AbuseControl,
    automod: AutoModState,
    history: ChatHistory,
}

impl ChatRoom {
    /// `now` stamps the welcome message.
    pub fn new(
        config: RoomConfig,
        words: Arc<BadWords>,
        transport: Arc<dyn Transport>,
        now: i64,
    ) -> Self {
        let registry =
            SessionRegistry::new(config.client_ceiling, config.max_clients_per_address);
        Self::with_registry(config, words, transport, registry, now)
    }

    /// Same as [`ChatRoom::new`] with deterministic session ids.
    pub fn with_seed(
        config: RoomConfig,
        words: Arc<BadWords>,
        transport: Arc<dyn Transport>,
        now: i64,
        seed: u64,
    ) -> Self {
        let registry = SessionRegistry::with_seed(
            config.client_ceiling,
            config.max_clients_per_address,
            seed,
        );
        Self::with_registry(config, words, transport, registry, now)
    }

    fn with_registry(
        config: RoomConfig,
        words: Arc<BadWords>,
        transport: Arc<dyn Transport>,
        registry: SessionRegistry,
        now: i64,
    ) -> Self {
        let mut history = ChatHistory::new(config.max_chat_history);
        if !config.welcome_message.is_empty() {
            history.append(ChatMessage::new(
                now,
                WELCOME_SENDER,
                config.welcome_message.clone(),
            ));
        }
        Self {
            abuse: AbuseControl::new(
                config.max_kicks,
                config.ban_window_ms,
                config.store_window_ms,
            ),
            automod: AutoModState::from_settings(&config.auto_mod),
            history,
            registry,
            words,
            transport,
            config,
        }
    }

    // ── Admission ───────────────────────────────────────────────────────────

    /// Admit a new connection, or tell it why not and close it.
    pub fn connect(&mut self, conn: ConnId, address: &str, now: i64) -> Result<SessionId, RoomError> {
        if self.abuse.is_banned(address) {
            return Err(self.reject(&conn, address, Rejection::Banned));
        }

        let anti_burst = self.automod.enabled;
        let id = match self.registry.admit(conn.clone(), address, now, anti_burst) {
            Ok(session) => session.id,
            Err(rejection) => return Err(self.reject(&conn, address, rejection)),
        };

        info!(
            session_id = id.get(),
            address = %address,
            online = self.registry.len(),
            capacity = self.registry.capacity(),
            "session admitted"
        );

        self.transport.admit(&conn);
        self.broadcast_roster();
        self.send_history(&conn);
        let _ = self
            .transport
            .send(&conn, &ServerEvent::Pulse(self.config.pulse_interval_ms()));
        Ok(id)
    }

    fn reject(&self, conn: &ConnId, address: &str, rejection: Rejection) -> RoomError {
        match rejection {
            Rejection::Banned => warn!(address = %address, "rejected banned address"),
            Rejection::Busy => info!(address = %address, "rejected connection, room busy"),
        }
        let _ = self
            .transport
            .send(conn, &ServerEvent::Bye(rejection.close_cause()));
        self.transport.close(conn);
        RoomError::AdmissionRejected(rejection)
    }

    // ── Removal ─────────────────────────────────────────────────────────────

    /// Server-initiated disconnect: `bye`, close, deregister, new roster.
    /// A `kick` also counts against the session's address.
    pub fn remove(&mut self, conn: &ConnId, cause: CloseCause, now: i64) -> Option<Session> {
        let session = self.registry.remove(conn)?;

        let _ = self.transport.send(conn, &ServerEvent::Bye(cause));
        self.transport.close(conn);
        self.broadcast_roster();

        if cause == CloseCause::Kick {
            let outcome = self.abuse.record_kick(&session.address, now);
            self.automod.bump_chaos(1);
            warn!(
                session_id = session.id.get(),
                address = %session.address,
                kicks = outcome.kick_count,
                chaos = self.automod.chaos,
                "session kicked"
            );
        } else {
            info!(
                session_id = session.id.get(),
                address = %session.address,
                cause = %cause,
                "session removed"
            );
        }
        Some(session)
    }

    /// The client went away on its own. No `bye`, no abuse bookkeeping.
    pub fn disconnect(&mut self, conn: &ConnId) -> Option<Session> {
        let session = self.registry.remove(conn)?;
        debug!(session_id = session.id.get(), "session disconnected");
        self.broadcast_roster();
        Some(session)
    }

    // ── Inbound ─────────────────────────────────────────────────────────────

    /// Refresh the heartbeat for `conn`. Returns false for unknown connections.
    pub fn touch(&mut self, conn: &ConnId, now: i64) -> bool {
        match self.registry.get_mut(conn) {
            Some(session) => {
                session.last_heartbeat_at = now;
                true
            }
            None => false,
        }
    }

    /// Handle one text frame from `conn`.
    pub fn handle_frame(&mut self, conn: &ConnId, raw: &str, now: i64) -> MessageOutcome {
        if !self.touch(conn, now) {
            return MessageOutcome::Ignored;
        }
        match ClientEvent::decode(raw) {
            Ok(Some(ClientEvent::Msg(submission))) => {
                self.handle_message(conn, &submission.text, now)
            }
            Ok(Some(ClientEvent::HistoryRequest)) => {
                self.send_history(conn);
                MessageOutcome::HistorySent
            }
            Ok(Some(ClientEvent::Pulse)) | Ok(None) => MessageOutcome::Ignored,
            Err(err) => self.kick_for(conn, err, now),
        }
    }

    /// Run one chat submission through the pipeline.
    pub fn handle_message(&mut self, conn: &ConnId, text: &str, now: i64) -> MessageOutcome {
        let Some(session) = self.registry.get(conn) else {
            return MessageOutcome::Ignored;
        };
        let session_id = session.id.get();
        let sender = session.name.clone();
        let last_activity_at = session.last_activity_at;
        let previous = session.last_message.clone();

        let length = text.chars().count();
        if length > self.config.max_message_length {
            let err = RoomError::MalformedMessage(format!(
                "message too long ({length} > {})",
                self.config.max_message_length
            ));
            return self.kick_for(conn, err, now);
        }

        if now - last_activity_at < MESSAGE_BURST_MS {
            self.automod.bump_chaos(1);
            debug!(session_id, chaos = self.automod.chaos, "message burst dropped");
            return MessageOutcome::Dropped(DropReason::Burst);
        }

        let escaped = filter::escape_markup(text);
        let text = if self.automod.enabled {
            match self.automod.moderate(&escaped, &self.words) {
                Verdict::Pass(text) => text,
                Verdict::Reject { violation, kick } => {
                    self.warn_sender(conn, violation, now);
                    if kick {
                        return self.kick_for(conn, RoomError::ModerationViolation(violation), now);
                    }
                    warn!(session_id, violation = %violation, "message rejected");
                    return MessageOutcome::Dropped(DropReason::Violation(violation));
                }
            }
        } else {
            escaped
        };

        if previous.as_deref() == Some(text.as_str()) && now - last_activity_at < DUPLICATE_WINDOW_MS {
            debug!(session_id, "duplicate message dropped");
            return MessageOutcome::Dropped(DropReason::Duplicate);
        }

        let message = ChatMessage::new(now, sender, text.clone());
        self.transport.broadcast(&ServerEvent::Msg(message.clone()));
        self.history.append(message.clone());
        if let Some(session) = self.registry.get_mut(conn) {
            session.last_activity_at = now;
            session.last_message = Some(text);
        }
        debug!(session_id, chaos = self.automod.chaos, "message accepted");
        MessageOutcome::Accepted(message)
    }

    fn kick_for(&mut self, conn: &ConnId, err: RoomError, now: i64) -> MessageOutcome {
        warn!(
            conn_id = %conn,
            error_kind = err.error_kind(),
            error = %err,
            "kicking sender"
        );
        self.remove(conn, CloseCause::Kick, now);
        MessageOutcome::Kicked(err)
    }

    fn warn_sender(&self, conn: &ConnId, violation: Violation, now: i64) {
        let (sender, text) = match violation {
            Violation::Shouting => SHOUT_WARNING,
            Violation::Similarity => SPAM_WARNING,
        };
        let _ = self
            .transport
            .send(conn, &ServerEvent::Msg(ChatMessage::new(now, sender, text)));
    }

    // ── Periodic ────────────────────────────────────────────────────────────

    /// Capacity recovery and chaos decay. Runs every ten seconds.
    pub fn decay_tick(&mut self) {
        let recovered = self.registry.recover_capacity();

        if self.automod.enabled {
            let level_before = self.automod.filter_level;
            let below_ceiling = self.registry.capacity() < self.registry.ceiling();
            self.automod.decay(below_ceiling);
            if self.automod.filter_level != level_before {
                info!(
                    from = level_before,
                    to = self.automod.filter_level,
                    chaos = self.automod.chaos,
                    "filter level changed"
                );
            }
        }

        if recovered {
            self.transport
                .broadcast(&ServerEvent::Max(self.registry.capacity()));
        }
        debug!(
            capacity = self.registry.capacity(),
            chaos = self.automod.chaos,
            filter_level = self.automod.filter_level,
            kick_on_cap = self.automod.kick_on_cap_violation,
            "decay tick"
        );
    }

    /// Drop silent and idle sessions, then expire address records.
    /// Returns how many sessions were removed.
    pub fn heartbeat_tick(&mut self, now: i64) -> usize {
        let pulse_limit = self.config.pulse_ms.saturating_add(PULSE_GRACE_MS);
        let idle_limit = self.config.max_idle_ms;

        let expired: Vec<(ConnId, CloseCause)> = self
            .registry
            .iter()
            .filter_map(|s| {
                if now - s.last_heartbeat_at > pulse_limit {
                    Some((s.conn.clone(), CloseCause::NoPulse))
                } else if now - s.last_activity_at > idle_limit {
                    Some((s.conn.clone(), CloseCause::Idle))
                } else {
                    None
                }
            })
            .collect();

        for (conn, cause) in &expired {
            self.remove(conn, *cause, now);
        }
        self.abuse.sweep(now);
        expired.len()
    }

    // ── Outbound helpers ────────────────────────────────────────────────────

    fn broadcast_roster(&self) {
        self.transport
            .broadcast(&ServerEvent::Max(self.registry.capacity()));
        self.transport
            .broadcast(&ServerEvent::Clients(self.registry.roster()));
    }

    fn send_history(&self, conn: &ConnId) {
        let _ = self
            .transport
            .send(conn, &ServerEvent::ChatHistory(self.history.snapshot()));
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn stats(&self) -> RoomStats {
        RoomStats {
            online: self.registry.len(),
            capacity: self.registry.capacity(),
            ceiling: self.registry.ceiling(),
            chaos: self.automod.chaos,
            filter_level: self.automod.filter_level,
            history: self.history.len(),
            tracked_addresses: self.abuse.len(),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn session(&self, conn: &ConnId) -> Option<&Session> {
        self.registry.get(conn)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn abuse(&self) -> &AbuseControl {
        &self.abuse
    }

    pub fn automod(&self) -> &AutoModState {
        &self.automod
    }

    pub fn automod_mut(&mut self) -> &mut AutoModState {
        &mut self.automod
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }
}
