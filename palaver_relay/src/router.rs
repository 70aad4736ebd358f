// Command routing and moderation handlers.
//
// `route` takes one decoded line attributed to a session and drives the
// session table: broadcast fan-out, private messages, and the moderation
// state machine. Classification itself lives in `palaver_protocol::command`;
// this module owns authorization, recipient resolution, and every reply
// line.
//
// Ordering rules enforced here:
// - The suspension gate runs before everything else. A suspended session
//   gets exactly one notice per attempted send — no cascade, and no command
//   (including logout) goes through.
// - Privileged commands check the sender's role before touching any state.
//   Every precondition violation answers with a one-line reason and mutates
//   nothing — no handler can leave the table partially updated.
// - Human mistakes (unknown keywords, missing recipients, empty messages)
//   are always answered; the only deliberate silence is the suspended-sender
//   case above.

use palaver_protocol::command::{
    self, Command, DirectedAction, DirectedLine, GlobalCommand, KNOWN_COMMANDS, ModerationCommand,
};

use crate::session::{ConnId, Role, SessionTable, Status};

/// Whether the relay loop keeps running after a routed line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Shutdown,
}

/// Route one line from `sender`. Never fails: transport trouble evicts the
/// affected peer, everything else is answered inline.
pub fn route(table: &mut SessionTable, sender: ConnId, line: &str) -> LoopControl {
    if table.status_of(sender) == Some(Status::Suspended) {
        if let Some(identity) = table.identity_of(sender) {
            tracing::info!(%identity, "suspended session attempted to send");
        }
        table.send_or_evict(sender, "You are suspended and cannot execute commands.");
        return LoopControl::Continue;
    }

    match command::parse(line) {
        Command::Empty => {}
        Command::Broadcast(text) => handle_broadcast(table, sender, &text),
        Command::Global(GlobalCommand::Start) => handle_start(table, sender),
        Command::Global(GlobalCommand::Shutdown) => return handle_shutdown(table, sender),
        Command::Global(GlobalCommand::Logout) => handle_logout(table, sender),
        Command::Global(GlobalCommand::List) => handle_list(table, sender),
        Command::UnknownGlobal(keyword) => {
            table.send_or_evict(
                sender,
                &format!(
                    "Unknown command: !{keyword}. Known commands: {}.",
                    KNOWN_COMMANDS.join(", ")
                ),
            );
        }
        Command::Directed(directed) => handle_directed(table, sender, directed),
    }
    LoopControl::Continue
}

fn handle_broadcast(table: &mut SessionTable, sender: ConnId, text: &str) {
    if let Some(identity) = table.identity_of(sender) {
        tracing::debug!(from = %identity, text, "broadcast");
    }
    table.broadcast(Some(sender), text, &[sender]);
}

fn handle_start(table: &mut SessionTable, sender: ConnId) {
    if table.role_of(sender) != Some(Role::Moderator) {
        table.send_or_evict(sender, "Unauthorized to start the game.");
        return;
    }
    if table.start_game() {
        tracing::info!("game started; joins are closed");
        table.broadcast(None, "Game has started. No new players can join.", &[]);
    } else {
        tracing::info!("attempt to start an already active game");
        table.broadcast(None, "Game has already started.", &[]);
    }
}

fn handle_shutdown(table: &mut SessionTable, sender: ConnId) -> LoopControl {
    if table.role_of(sender) != Some(Role::Moderator) {
        table.send_or_evict(sender, "Unauthorized to shut down the server.");
        return LoopControl::Continue;
    }
    tracing::info!("server shutting down on moderator command");
    LoopControl::Shutdown
}

fn handle_logout(table: &mut SessionTable, sender: ConnId) {
    table.send_to(sender, "Goodbye!");
    if let Some(identity) = table.remove(sender) {
        tracing::info!(%identity, "logged out");
        table.broadcast(None, &format!("{identity} has left the chat."), &[]);
    }
}

fn handle_list(table: &mut SessionTable, sender: ConnId) {
    let mut lines = vec!["Current clients:".to_owned()];
    for (identity, status) in table.roster() {
        lines.push(format!("{identity} - {status}"));
    }
    for line in lines {
        if !table.send_or_evict(sender, &line) {
            break;
        }
    }
}

fn handle_directed(table: &mut SessionTable, sender: ConnId, directed: DirectedLine) {
    let DirectedLine { recipients, action } = directed;
    if recipients.is_empty() {
        table.send_or_evict(sender, "Enter a valid pseudonym after '@'.");
        return;
    }
    match action {
        DirectedAction::Moderation(cmd) => {
            targeted_moderation(table, sender, &recipients[0], Some(cmd));
        }
        DirectedAction::Unknown(keyword) => {
            tracing::info!(%keyword, "unknown targeted command");
            targeted_moderation(table, sender, &recipients[0], None);
        }
        DirectedAction::Message(body) => private_message(table, sender, &recipients, &body),
    }
}

/// Shared precondition chain for `!ban`/`!suspend`/`!forgive` (and for an
/// unrecognized sub-command, which still goes through authorization and
/// target resolution before being answered — `cmd = None`).
fn targeted_moderation(
    table: &mut SessionTable,
    sender: ConnId,
    target_name: &str,
    cmd: Option<ModerationCommand>,
) {
    if table.role_of(sender) != Some(Role::Moderator) {
        table.send_or_evict(sender, "Unauthorized command execution.");
        return;
    }
    let Some(target) = table.id_by_identity(target_name) else {
        table.send_or_evict(sender, &format!("No such user: {target_name}"));
        return;
    };
    let Some(cmd) = cmd else {
        table.send_or_evict(sender, "Unknown command.");
        return;
    };
    if table.role_of(target) == Some(Role::Moderator) {
        table.send_or_evict(sender, "The moderator cannot be targeted.");
        return;
    }
    match cmd {
        ModerationCommand::Ban => ban(table, target),
        ModerationCommand::Suspend => suspend(table, sender, target),
        ModerationCommand::Forgive => forgive(table, sender, target),
    }
}

fn ban(table: &mut SessionTable, target: ConnId) {
    // Notified, then disconnected, then announced to everyone left.
    table.send_to(target, "You have been banned from the game.");
    if let Some(identity) = table.remove(target) {
        tracing::info!(%identity, "banned");
        table.broadcast(None, &format!("Player {identity} has been banned"), &[]);
    }
}

fn suspend(table: &mut SessionTable, sender: ConnId, target: ConnId) {
    let Some(name) = table.identity_of(target).map(str::to_owned) else {
        return;
    };
    match table.status_of(target) {
        Some(Status::Suspended) => {
            table.send_or_evict(sender, &format!("{name} is already suspended."));
        }
        Some(Status::Active) => {
            table.set_status(target, Status::Suspended);
            tracing::info!(identity = %name, "suspended");
            table.send_to(target, "You have been suspended.");
            table.broadcast(None, &format!("{name} has been suspended."), &[target]);
        }
        None => {}
    }
}

fn forgive(table: &mut SessionTable, sender: ConnId, target: ConnId) {
    let Some(name) = table.identity_of(target).map(str::to_owned) else {
        return;
    };
    match table.status_of(target) {
        Some(Status::Active) => {
            table.send_or_evict(sender, &format!("{name} is not suspended."));
        }
        Some(Status::Suspended) => {
            table.set_status(target, Status::Active);
            tracing::info!(identity = %name, "forgiven");
            table.send_to(target, "You have been forgiven and can participate again.");
            table.broadcast(None, &format!("{name} has been forgiven."), &[target]);
        }
        None => {}
    }
}

fn private_message(table: &mut SessionTable, sender: ConnId, recipients: &[String], body: &str) {
    if body.is_empty() {
        table.send_or_evict(sender, "You didn't enter a message.");
        return;
    }
    let Some(sender_name) = table.identity_of(sender).map(str::to_owned) else {
        return;
    };
    let line = format!("PM from {sender_name}: {body}");

    // Resolve named recipients, deduplicated in first-mention order.
    // Unresolved names are reported individually; they never block delivery
    // to the rest.
    let mut targets: Vec<ConnId> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    for name in recipients {
        if seen.contains(&name.as_str()) {
            continue;
        }
        seen.push(name);
        match table.id_by_identity(name) {
            Some(id) => targets.push(id),
            None => {
                table.send_or_evict(sender, &format!("No such user: {name}"));
            }
        }
    }

    // The moderator supervises all direct traffic: implicit CC on every
    // private message, delivered at most once even when named explicitly.
    if let Some(mod_id) = table.moderator_id() {
        if !targets.contains(&mod_id) {
            targets.push(mod_id);
        }
    }

    for id in targets {
        table.send_or_evict(id, &line);
    }
    tracing::debug!(from = %sender_name, recipients = ?seen, "private message");
}

#[cfg(test)]
mod tests {
    use std::io::{self, BufReader};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    use palaver_protocol::framing::read_line;

    use crate::session::{AdmissionError, GamePhase, Role, SessionTable, Status};

    use super::*;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn join(table: &mut SessionTable, identity: &str, role: Role) -> (ConnId, BufReader<TcpStream>) {
        let (client, server) = tcp_pair();
        let addr = server.peer_addr().unwrap();
        let id = table.admit(identity.into(), role, addr, server).unwrap();
        (id, BufReader::new(client))
    }

    fn recv(reader: &mut BufReader<TcpStream>) -> String {
        read_line(reader).unwrap().unwrap()
    }

    /// Assert no line arrives within a short window.
    fn assert_silent(reader: &mut BufReader<TcpStream>) {
        reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        match read_line(reader) {
            Err(e) => assert!(
                matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
                "unexpected error kind: {e:?}"
            ),
            Ok(line) => panic!("expected silence, got {line:?}"),
        }
        reader.get_ref().set_read_timeout(None).unwrap();
    }

    #[test]
    fn plain_text_reaches_everyone_but_sender() {
        let mut table = SessionTable::new(8);
        let (alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);
        let (_bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        assert_eq!(route(&mut table, alice, "hello"), LoopControl::Continue);
        assert_eq!(recv(&mut bob_r), "Alice: hello");
        assert_silent(&mut alice_r);
    }

    #[test]
    fn suspended_sender_gets_single_notice_and_nothing_else() {
        let mut table = SessionTable::new(8);
        let (_alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);
        let (bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);
        table.set_status(bob, Status::Suspended);

        route(&mut table, bob, "hi everyone");
        assert_eq!(
            recv(&mut bob_r),
            "You are suspended and cannot execute commands."
        );
        assert_silent(&mut bob_r);

        // The gate covers commands too, logout included.
        route(&mut table, bob, "logout");
        assert_eq!(
            recv(&mut bob_r),
            "You are suspended and cannot execute commands."
        );
        assert!(table.contains(bob));

        // And the would-be recipient saw none of it.
        assert_silent(&mut alice_r);
    }

    #[test]
    fn suspended_session_still_receives_broadcasts() {
        let mut table = SessionTable::new(8);
        let (alice, _alice_r) = join(&mut table, "Alice", Role::Regular);
        let (bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);
        table.set_status(bob, Status::Suspended);

        route(&mut table, alice, "still here?");
        assert_eq!(recv(&mut bob_r), "Alice: still here?");
    }

    #[test]
    fn suspend_notifies_target_and_announces_to_the_rest() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (_alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);
        let (bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, admin, "@Bob !suspend");
        assert_eq!(table.status_of(bob), Some(Status::Suspended));
        assert_eq!(recv(&mut bob_r), "You have been suspended.");
        assert_silent(&mut bob_r);
        assert_eq!(recv(&mut alice_r), "Bob has been suspended.");
        assert_eq!(recv(&mut admin_r), "Bob has been suspended.");
    }

    #[test]
    fn suspend_twice_replies_already_suspended() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, admin, "@Bob !suspend");
        let _ = recv(&mut admin_r); // announcement
        let _ = recv(&mut bob_r); // notice

        route(&mut table, admin, "@Bob !suspend");
        assert_eq!(recv(&mut admin_r), "Bob is already suspended.");
        assert_silent(&mut bob_r);
        assert_eq!(table.status_of(bob), Some(Status::Suspended));
    }

    #[test]
    fn forgive_restores_sending() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);
        table.set_status(bob, Status::Suspended);

        route(&mut table, admin, "@Bob !forgive");
        assert_eq!(table.status_of(bob), Some(Status::Active));
        assert_eq!(
            recv(&mut bob_r),
            "You have been forgiven and can participate again."
        );
        assert_eq!(recv(&mut admin_r), "Bob has been forgiven.");

        route(&mut table, bob, "back!");
        assert_eq!(recv(&mut admin_r), "Bob: back!");
    }

    #[test]
    fn forgive_active_target_replies_not_suspended() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, admin, "@Bob !forgive");
        assert_eq!(recv(&mut admin_r), "Bob is not suspended.");
        assert_silent(&mut bob_r);
        assert_eq!(table.status_of(bob), Some(Status::Active));
    }

    #[test]
    fn ban_notifies_removes_and_announces_to_the_rest() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (_alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);
        let (bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, admin, "@Bob !ban");
        assert!(!table.contains(bob));
        assert_eq!(table.id_by_identity("Bob"), None);

        assert_eq!(recv(&mut bob_r), "You have been banned from the game.");
        // Then the connection is gone.
        assert_eq!(read_line(&mut bob_r).unwrap(), None);

        assert_eq!(recv(&mut alice_r), "Player Bob has been banned");
        assert_eq!(recv(&mut admin_r), "Player Bob has been banned");
    }

    #[test]
    fn moderation_requires_moderator() {
        let mut table = SessionTable::new(8);
        let (alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);
        let (bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, alice, "@Bob !ban");
        assert_eq!(recv(&mut alice_r), "Unauthorized command execution.");
        assert!(table.contains(bob));
        assert_silent(&mut bob_r);
    }

    #[test]
    fn moderator_cannot_be_targeted() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (_bob, _bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, admin, "@Admin !suspend");
        assert_eq!(recv(&mut admin_r), "The moderator cannot be targeted.");
        assert_eq!(table.status_of(admin), Some(Status::Active));
    }

    #[test]
    fn moderation_target_must_exist() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);

        route(&mut table, admin, "@Ghost !ban");
        assert_eq!(recv(&mut admin_r), "No such user: Ghost");
    }

    #[test]
    fn start_gates_new_joins_and_repeats_without_restarting() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (_alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);

        route(&mut table, admin, "!start");
        assert_eq!(table.phase(), GamePhase::Started);
        assert_eq!(recv(&mut admin_r), "Game has started. No new players can join.");
        assert_eq!(recv(&mut alice_r), "Game has started. No new players can join.");

        let (_client, server) = tcp_pair();
        let addr = server.peer_addr().unwrap();
        assert_eq!(
            table.admit("Bob".into(), Role::Regular, addr, server),
            Err(AdmissionError::GameAlreadyStarted)
        );

        // A repeat start yields the already-started notice, exactly once,
        // not a second start announcement.
        route(&mut table, admin, "!start");
        assert_eq!(recv(&mut admin_r), "Game has already started.");
        assert_eq!(recv(&mut alice_r), "Game has already started.");
        assert_silent(&mut admin_r);
        assert_silent(&mut alice_r);
    }

    #[test]
    fn start_requires_moderator() {
        let mut table = SessionTable::new(8);
        let (alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);

        route(&mut table, alice, "!start");
        assert_eq!(recv(&mut alice_r), "Unauthorized to start the game.");
        assert_eq!(table.phase(), GamePhase::Open);
    }

    #[test]
    fn shutdown_requires_moderator_and_signals_the_loop() {
        let mut table = SessionTable::new(8);
        let (admin, _admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);

        assert_eq!(route(&mut table, alice, "!shutdown"), LoopControl::Continue);
        assert_eq!(recv(&mut alice_r), "Unauthorized to shut down the server.");
        assert_eq!(table.len(), 2);

        // The router only signals; the relay loop owns the drain.
        assert_eq!(route(&mut table, admin, "!shutdown"), LoopControl::Shutdown);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn private_message_delivered_once_with_moderator_cc() {
        let mut table = SessionTable::new(8);
        let (_admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (alice, _alice_r) = join(&mut table, "Alice", Role::Regular);
        let (_bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        // Duplicate mention still means one copy.
        route(&mut table, alice, "@Bob @Bob hello there");
        assert_eq!(recv(&mut bob_r), "PM from Alice: hello there");
        assert_silent(&mut bob_r);

        // The moderator is CC'd on every private message.
        assert_eq!(recv(&mut admin_r), "PM from Alice: hello there");
        assert_silent(&mut admin_r);
    }

    #[test]
    fn explicitly_named_moderator_gets_one_copy() {
        let mut table = SessionTable::new(8);
        let (_admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (alice, _alice_r) = join(&mut table, "Alice", Role::Regular);
        let (_bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, alice, "@Admin @Bob psst");
        assert_eq!(recv(&mut admin_r), "PM from Alice: psst");
        assert_silent(&mut admin_r);
        assert_eq!(recv(&mut bob_r), "PM from Alice: psst");
    }

    #[test]
    fn unresolved_recipient_reported_without_blocking_the_rest() {
        let mut table = SessionTable::new(8);
        let (alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);
        let (_bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, alice, "@Ghost @Bob hi");
        assert_eq!(recv(&mut alice_r), "No such user: Ghost");
        assert_eq!(recv(&mut bob_r), "PM from Alice: hi");
    }

    #[test]
    fn private_message_without_body_rejected() {
        let mut table = SessionTable::new(8);
        let (alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);
        let (_bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, alice, "@Bob");
        assert_eq!(recv(&mut alice_r), "You didn't enter a message.");
        assert_silent(&mut bob_r);
    }

    #[test]
    fn directed_line_without_recipients_rejected() {
        let mut table = SessionTable::new(8);
        let (alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);

        route(&mut table, alice, "@");
        assert_eq!(recv(&mut alice_r), "Enter a valid pseudonym after '@'.");
    }

    #[test]
    fn unknown_global_command_gets_feedback() {
        let mut table = SessionTable::new(8);
        let (alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);

        route(&mut table, alice, "!dance");
        let reply = recv(&mut alice_r);
        assert!(reply.contains("Unknown command: !dance"), "got: {reply}");
        assert!(reply.contains("!start"), "got: {reply}");
    }

    #[test]
    fn unknown_directed_command_gets_feedback() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (_bob, _bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, admin, "@Bob !vaporize");
        assert_eq!(recv(&mut admin_r), "Unknown command.");
    }

    #[test]
    fn logout_farewell_then_departure_broadcast() {
        let mut table = SessionTable::new(8);
        let (alice, mut alice_r) = join(&mut table, "Alice", Role::Regular);
        let (_bob, mut bob_r) = join(&mut table, "Bob", Role::Regular);

        route(&mut table, alice, "logout");
        assert_eq!(recv(&mut alice_r), "Goodbye!");
        assert_eq!(read_line(&mut alice_r).unwrap(), None);
        assert!(!table.contains(alice));

        assert_eq!(recv(&mut bob_r), "Alice has left the chat.");
    }

    #[test]
    fn list_shows_sorted_roster_with_statuses() {
        let mut table = SessionTable::new(8);
        let (admin, mut admin_r) = join(&mut table, "Admin", Role::Moderator);
        let (_bob, _bob_r) = join(&mut table, "Bob", Role::Regular);
        let (alice, _alice_r) = join(&mut table, "Alice", Role::Regular);
        table.set_status(alice, Status::Suspended);

        route(&mut table, admin, "!list");
        assert_eq!(recv(&mut admin_r), "Current clients:");
        assert_eq!(recv(&mut admin_r), "Admin - active");
        assert_eq!(recv(&mut admin_r), "Alice - suspended");
        assert_eq!(recv(&mut admin_r), "Bob - active");
    }
}
