// Session registry for the chat relay.
//
// `SessionTable` is the central data structure that `server.rs` and
// `router.rs` drive: the single source of truth for who is connected. All
// mutation happens through methods called from the server's single-threaded
// main loop — no internal locking.
//
// Key responsibilities:
// - Admission: enforce identity uniqueness, the game-phase join gate, and
//   the capacity limit. The moderator role is decided by the caller (the
//   password challenge lives in `server.rs`), never re-derived from the
//   identity string here.
// - Dual index: `ConnId → Session` plus `identity → ConnId`, kept consistent
//   by `admit`/`remove` only.
// - Delivery: best-effort line sends to one peer or a fan-out to all.
//   A peer whose socket fails is evicted; during a fan-out the eviction is
//   deferred until every other peer has been served.
// - Game phase: the process-wide Open/Started flag. Open → Started is
//   one-way for the lifetime of the process.
//
// Writing to client streams: each `Session` owns the write half of its
// peer's `TcpStream` in a `BufWriter`; the read half lives on that peer's
// reader thread. `remove` shuts the stream down in the same step that drops
// the entry — a session is never closed-but-present or
// present-but-unreachable.

use std::collections::{BTreeMap, HashMap};
use std::io::BufWriter;
use std::net::{Shutdown, SocketAddr, TcpStream};

use palaver_protocol::framing::write_line;
use thiserror::Error;

/// Relay-assigned connection ID. Reader threads tag inbound events with it;
/// it is never reused for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u32);

/// Privilege level of a session, fixed at admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Regular,
    Moderator,
}

/// Whether a session may currently send. A suspended session still receives
/// broadcasts; only its outbound actions are blocked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Active,
    Suspended,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Active => "active",
            Status::Suspended => "suspended",
        })
    }
}

/// Process-wide join gate. `Started` rejects every new regular admission;
/// there is no way back to `Open`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GamePhase {
    Open,
    Started,
}

/// Why an admission attempt was refused. The `Display` text is the exact
/// rejection line written to the peer before closing it.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Pseudonym already in use.")]
    DuplicateIdentity,
    #[error("Game has already started. Cannot join now.")]
    GameAlreadyStarted,
    #[error("Incorrect password.")]
    BadPassword,
    #[error("Server is full. Cannot join now.")]
    ServerFull,
}

struct Session {
    identity: String,
    role: Role,
    status: Status,
    remote_addr: SocketAddr,
    writer: BufWriter<TcpStream>,
}

/// Registry of connected sessions plus the game phase.
pub struct SessionTable {
    sessions: BTreeMap<ConnId, Session>,
    ids_by_identity: HashMap<String, ConnId>,
    next_id: u32,
    max_clients: usize,
    phase: GamePhase,
}

impl SessionTable {
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            ids_by_identity: HashMap::new(),
            next_id: 0,
            max_clients,
            phase: GamePhase::Open,
        }
    }

    /// Attempt to admit a new session. The identity must be unique
    /// (case-sensitive); regulars are additionally gated by the game phase
    /// and the capacity limit. The moderator bypasses both gates so a
    /// disconnected operator can take a running game back over.
    ///
    /// `BadPassword` is never produced here — the password challenge happens
    /// during negotiation, before `admit` is called.
    pub fn admit(
        &mut self,
        identity: String,
        role: Role,
        remote_addr: SocketAddr,
        stream: TcpStream,
    ) -> Result<ConnId, AdmissionError> {
        if self.ids_by_identity.contains_key(&identity) {
            return Err(AdmissionError::DuplicateIdentity);
        }
        if role != Role::Moderator {
            if self.phase == GamePhase::Started {
                return Err(AdmissionError::GameAlreadyStarted);
            }
            if self.sessions.len() >= self.max_clients {
                return Err(AdmissionError::ServerFull);
            }
        }

        let id = ConnId(self.next_id);
        self.next_id += 1;
        self.ids_by_identity.insert(identity.clone(), id);
        self.sessions.insert(
            id,
            Session {
                identity,
                role,
                status: Status::Active,
                remote_addr,
                writer: BufWriter::new(stream),
            },
        );
        Ok(id)
    }

    /// Remove a session, shutting its stream down in the same step.
    /// Idempotent: removing an absent id is a no-op returning `None` —
    /// concurrent eviction paths may race to remove the same entry within
    /// one loop iteration. Returns the freed identity.
    pub fn remove(&mut self, id: ConnId) -> Option<String> {
        let session = self.sessions.remove(&id)?;
        self.ids_by_identity.remove(&session.identity);
        let _ = session.writer.get_ref().shutdown(Shutdown::Both);
        tracing::info!(
            identity = %session.identity,
            addr = %session.remote_addr,
            "closed connection"
        );
        Some(session.identity)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn identity_of(&self, id: ConnId) -> Option<&str> {
        self.sessions.get(&id).map(|s| s.identity.as_str())
    }

    pub fn id_by_identity(&self, identity: &str) -> Option<ConnId> {
        self.ids_by_identity.get(identity).copied()
    }

    pub fn role_of(&self, id: ConnId) -> Option<Role> {
        self.sessions.get(&id).map(|s| s.role)
    }

    pub fn status_of(&self, id: ConnId) -> Option<Status> {
        self.sessions.get(&id).map(|s| s.status)
    }

    /// Set a session's status. Returns false if the session is absent.
    pub fn set_status(&mut self, id: ConnId, status: Status) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.status = status;
                true
            }
            None => false,
        }
    }

    /// The moderator's id, if one is connected. Identity uniqueness keeps
    /// this at most one entry.
    pub fn moderator_id(&self) -> Option<ConnId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.role == Role::Moderator)
            .map(|(id, _)| *id)
    }

    /// Point-in-time snapshot of the connected ids. Iterating the snapshot
    /// stays safe while handlers mutate the table.
    pub fn ids(&self) -> Vec<ConnId> {
        self.sessions.keys().copied().collect()
    }

    /// `(identity, status)` rows sorted by identity, for the roster listing.
    pub fn roster(&self) -> Vec<(String, Status)> {
        let mut rows: Vec<(String, Status)> = self
            .sessions
            .values()
            .map(|s| (s.identity.clone(), s.status))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Open → Started. Returns false if the game had already started; there
    /// is no transition back.
    pub fn start_game(&mut self) -> bool {
        if self.phase == GamePhase::Started {
            return false;
        }
        self.phase = GamePhase::Started;
        true
    }

    /// Best-effort single send. Returns false if the session is absent or
    /// the write failed; the caller decides whether that evicts the peer.
    pub fn send_to(&mut self, id: ConnId, line: &str) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        match write_line(&mut session.writer, line) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(identity = %session.identity, %error, "send failed");
                false
            }
        }
    }

    /// Single send where a failure evicts the peer. Returns whether the
    /// line was delivered.
    pub fn send_or_evict(&mut self, id: ConnId, line: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        if self.send_to(id, line) {
            true
        } else {
            self.remove(id);
            false
        }
    }

    /// Fan a line out to every session not in `exclude`. With a sender, the
    /// line is prefixed `"<identity>: "`; system broadcasts pass `None` and
    /// go out unprefixed.
    ///
    /// A send failure against one peer never aborts delivery to the rest:
    /// failed peers are collected during the fan-out and removed only after
    /// it completes. Returns the evicted ids. The operation as a whole
    /// cannot fail.
    pub fn broadcast(&mut self, sender: Option<ConnId>, text: &str, exclude: &[ConnId]) -> Vec<ConnId> {
        let line = match sender.and_then(|id| self.identity_of(id)) {
            Some(identity) => format!("{identity}: {text}"),
            None => text.to_owned(),
        };

        let mut evicted = Vec::new();
        for id in self.ids() {
            if exclude.contains(&id) {
                continue;
            }
            if !self.send_to(id, &line) {
                evicted.push(id);
            }
        }
        for id in &evicted {
            self.remove(*id);
        }
        evicted
    }

    /// Notify every session and close it. Used for the terminating drain on
    /// `!shutdown` and on a fatal listener failure.
    pub fn shutdown_all(&mut self, notice: &str) {
        for id in self.ids() {
            self.send_to(id, notice);
        }
        let drained = std::mem::take(&mut self.sessions);
        self.ids_by_identity.clear();
        for session in drained.into_values() {
            let _ = session.writer.get_ref().shutdown(Shutdown::Both);
        }
    }
}
