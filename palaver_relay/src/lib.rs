// palaver_relay — moderated multi-client chat relay.
//
// The relay is a thin message broker: it accepts TCP connections from chat
// clients, registers each under a unique pseudonym, and fans broadcast and
// private messages out to the connected set. One password-authenticated
// moderator can suspend, forgive, and ban participants, and can start the
// game — a one-way phase change that closes the door to new joins.
//
// Module overview:
// - `config.rs`:   Server configuration — TOML file with full defaults,
//                  overridable from the CLI.
// - `session.rs`:  The session registry — dual-indexed table of connected
//                  participants, admission gates, game phase, delivery
//                  primitives. The core data structure that everything
//                  else drives.
// - `router.rs`:   Command routing and the moderation state machine.
// - `server.rs`:   TCP listener, reader threads (one per client), identity
//                  negotiation, and the main event loop. Uses `std::net`
//                  with a thread-per-reader architecture and an `mpsc`
//                  channel to funnel events into the single-threaded
//                  `SessionTable`.
// - `client.rs`:   `NetClient` — programmatic chat client used by the
//                  integration tests; the interactive terminal client is
//                  the `palaver-client` binary.
//
// Dependencies: `palaver_protocol` (line framing and command grammar).
//
// The relay can run as a standalone binary (`palaver-server`) or be
// embedded in another process via the library API (`start_server`).

pub mod client;
pub mod config;
pub mod router;
pub mod server;
pub mod session;

pub use server::start_server;
