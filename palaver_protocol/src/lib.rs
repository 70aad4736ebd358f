// palaver_protocol — wire vocabulary for the Palaver chat relay.
//
// This crate defines the line framing and command grammar used by the relay
// server and chat clients to communicate over TCP. It is shared between both
// sides and has no dependency on the server crate.
//
// Module overview:
// - `framing.rs`:  Newline-delimited framing over any `BufRead`/`Write`
//                  stream: one UTF-8 text line per command or notice, with
//                  a maximum-length guard.
// - `command.rs`:  Classification of one inbound line into the command
//                  taxonomy — broadcast, global `!` command, or directed
//                  `@` line — plus the directed-line token grammar.
//
// Design decisions:
// - **Plain text wire.** Every message a human types goes over the wire as
//   typed; every server notice is a readable line. No serialization layer.
// - **No async runtime.** Framing uses `std::io` traits, compatible with
//   blocking TCP streams and buffered wrappers.
// - **Parsing is pure.** `command::parse` never touches a socket and never
//   fails; the relay decides authorization and replies.

pub mod command;
pub mod framing;

pub use command::{
    Command, DirectedAction, DirectedLine, GlobalCommand, KNOWN_COMMANDS, ModerationCommand, parse,
};
pub use framing::{MAX_LINE_BYTES, read_line, write_line};

/// Line the server sends to a claimed moderator identity before reading one
/// password line. Clients match it verbatim to know a reply is expected.
pub const PASSWORD_PROMPT: &str = "Moderator detected. Enter the password:";

/// Prefix of the line acknowledging a successful join. Everything up to the
/// first rejection is freeform, so clients key on this prefix alone.
pub const WELCOME_PREFIX: &str = "Welcome, ";

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    // A command surviving the wire intact is the whole contract between
    // client input and server dispatch.
    #[test]
    fn typed_line_survives_framing_and_classifies() {
        let mut wire = Vec::new();
        write_line(&mut wire, "@Bob !suspend").unwrap();

        let mut cursor = Cursor::new(&wire);
        let line = read_line(&mut cursor).unwrap().unwrap();
        let Command::Directed(directed) = parse(&line) else {
            panic!("expected a directed command");
        };
        assert_eq!(directed.recipients, vec!["Bob".to_owned()]);
        assert_eq!(
            directed.action,
            DirectedAction::Moderation(ModerationCommand::Suspend)
        );
    }

    #[test]
    fn handshake_constants_are_single_lines() {
        assert!(!PASSWORD_PROMPT.contains('\n'));
        assert!(!WELCOME_PREFIX.contains('\n'));
    }
}
