// TCP server and main event loop for the chat relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `ServerEvent::NewConnection` to the main thread.
// - **Reader threads** (one per client): call `framing::read_line()` in a
//   loop and send `ServerEvent::LineFrom` to the main thread — one event per
//   newline-delimited command, however the bytes were segmented on the wire.
//   On EOF or error, send `ServerEvent::Disconnected`.
// - **Main thread**: owns the `SessionTable`, receives events from the
//   channel, and dispatches them through the router. The channel receiver is
//   the readiness source: an event arriving is the only signal the loop
//   waits on, with a short `recv_timeout` so the keep-running flag is
//   checked while idle.
//
// The main thread is the only writer to client TCP streams (via the session
// table). Reader threads only read. This avoids concurrent read/write on the
// same `TcpStream`.
//
// Identity negotiation (pseudonym line, moderator password challenge) also
// runs on the main thread, under a short read timeout so a stalled joiner
// cannot hold the loop for long.
//
// Lifecycle: `Running` until the moderator's shutdown command or a listener
// failure, then `Terminating` (every session notified and closed), then
// `Stopped`. `ServerHandle::stop` flips the keep-running flag from outside.

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use palaver_protocol::framing::{read_line, write_line};
use palaver_protocol::{PASSWORD_PROMPT, WELCOME_PREFIX};

use crate::config::ServerConfig;
use crate::router::{self, LoopControl};
use crate::session::{ConnId, Role, SessionTable};

/// How long a joining connection may take per handshake line.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle poll interval for the keep-running check.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Events sent from listener/reader threads to the main thread.
enum ServerEvent {
    NewConnection {
        stream: TcpStream,
        addr: SocketAddr,
    },
    LineFrom {
        id: ConnId,
        line: String,
    },
    Disconnected {
        id: ConnId,
    },
    ListenerFailed {
        error: io::Error,
    },
}

/// Relay loop lifecycle.
enum LoopState {
    Running,
    Terminating,
    Stopped,
}

/// Handle returned by `start_server` to control the running relay.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }

    /// Wait for the relay loop to end on its own (moderator shutdown or a
    /// fatal listener failure).
    pub fn join(self) {
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

/// Start the relay on a background thread. Returns a handle for stopping it
/// and the actual bound address (useful when port 0 is used to let the OS
/// pick a free port).
pub fn start_server(config: ServerConfig) -> io::Result<(ServerHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.address.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    let thread = thread::spawn(move || {
        run_server(listener, config, keep_running_clone);
    });

    Ok((
        ServerHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until the keep-running flag drops, the moderator
/// issues a shutdown, or the listener fails.
fn run_server(listener: TcpListener, config: ServerConfig, keep_running: Arc<AtomicBool>) {
    let mut table = SessionTable::new(config.max_clients as usize);
    let (tx, rx): (Sender<ServerEvent>, Receiver<ServerEvent>) = mpsc::channel();

    // Non-blocking so the accept thread can check keep_running periodically.
    listener.set_nonblocking(true).ok();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(ServerEvent::NewConnection { stream, addr });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(error) => {
                    let _ = tx_listener.send(ServerEvent::ListenerFailed { error });
                    break;
                }
            }
        }
    });

    let mut state = LoopState::Running;
    loop {
        match state {
            LoopState::Running => {
                if !keep_running.load(Ordering::SeqCst) {
                    state = LoopState::Terminating;
                    continue;
                }
                match rx.recv_timeout(IDLE_POLL) {
                    Ok(event) => {
                        if handle_event(&mut table, &config, event, &tx, &keep_running)
                            == LoopControl::Shutdown
                        {
                            state = LoopState::Terminating;
                            continue;
                        }
                        // Drain events that arrived during handling.
                        while let Ok(event) = rx.try_recv() {
                            if handle_event(&mut table, &config, event, &tx, &keep_running)
                                == LoopControl::Shutdown
                            {
                                state = LoopState::Terminating;
                                break;
                            }
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        state = LoopState::Terminating;
                    }
                }
            }
            LoopState::Terminating => {
                // Drain: notify and close every session, release the
                // listener and reader threads.
                keep_running.store(false, Ordering::SeqCst);
                table.shutdown_all("Server is shutting down.");
                state = LoopState::Stopped;
            }
            LoopState::Stopped => break,
        }
    }
    tracing::info!("relay loop stopped");
}

/// Dispatch a single event. Returns `Shutdown` when the loop should begin
/// terminating.
fn handle_event(
    table: &mut SessionTable,
    config: &ServerConfig,
    event: ServerEvent,
    tx: &Sender<ServerEvent>,
    keep_running: &Arc<AtomicBool>,
) -> LoopControl {
    match event {
        ServerEvent::NewConnection { stream, addr } => {
            handle_new_connection(table, config, stream, addr, tx, keep_running);
            LoopControl::Continue
        }
        ServerEvent::LineFrom { id, line } => {
            // A line may race with this peer's removal (eviction, ban)
            // within one loop iteration; lines from unknown ids are stale.
            if !table.contains(id) {
                return LoopControl::Continue;
            }
            router::route(table, id, &line)
        }
        ServerEvent::Disconnected { id } => {
            // Orderly peer close: the logout cleanup path minus all
            // farewell traffic.
            if let Some(identity) = table.remove(id) {
                tracing::info!(%identity, "client disconnected");
            }
            LoopControl::Continue
        }
        ServerEvent::ListenerFailed { error } => {
            tracing::error!(%error, "listening socket failed; shutting down");
            LoopControl::Shutdown
        }
    }
}

/// Best-effort line to a connection that has no session yet.
fn notify(mut stream: &TcpStream, line: &str) {
    let _ = write_line(&mut stream, line);
}

/// Negotiate identity with a new connection, admit it, and spawn its reader
/// thread. Every rejection is answered with one line before the connection
/// drops; a peer that stalls or vanishes mid-handshake is dropped silently.
fn handle_new_connection(
    table: &mut SessionTable,
    config: &ServerConfig,
    stream: TcpStream,
    addr: SocketAddr,
    tx: &Sender<ServerEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();

    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });

    // First line is the pseudonym.
    let identity = match read_line(&mut reader) {
        Ok(Some(line)) => line.trim().to_owned(),
        _ => {
            tracing::debug!(%addr, "connection dropped during handshake");
            return;
        }
    };
    if identity.is_empty() {
        notify(&stream, "Pseudonym cannot be empty.");
        return;
    }

    // The moderator identity must pass the password challenge; the role is
    // decided here, once, instead of re-checking the name in every handler.
    let role = if identity == config.moderator_name {
        notify(&stream, PASSWORD_PROMPT);
        let supplied = match read_line(&mut reader) {
            Ok(Some(line)) => line,
            _ => return,
        };
        if supplied != config.moderator_password {
            tracing::warn!(%addr, "failed moderator password challenge");
            notify(&stream, "Incorrect password.");
            return;
        }
        Role::Moderator
    } else {
        Role::Regular
    };

    let session_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };

    match table.admit(identity.clone(), role, addr, session_stream) {
        Ok(id) => {
            // Clear the handshake timeout for the long-lived reader loop
            // (the socket option is shared with the reader's clone).
            stream.set_read_timeout(None).ok();

            table.send_to(id, &format!("{WELCOME_PREFIX}{identity}!"));
            table.broadcast(None, &format!("{identity} has joined the chat."), &[id]);
            tracing::info!(%identity, %addr, ?role, "accepted new connection");

            let tx_reader = tx.clone();
            let keep_running_reader = keep_running.clone();
            thread::spawn(move || {
                reader_loop(reader, id, tx_reader, keep_running_reader);
            });
        }
        Err(reason) => {
            tracing::info!(%identity, %addr, %reason, "admission rejected");
            notify(&stream, &reason.to_string());
        }
    }
}

/// Reader loop for a single client. Runs in its own thread; the only state
/// it touches is its stream and the event channel.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    id: ConnId,
    tx: Sender<ServerEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match read_line(&mut reader) {
            Ok(Some(line)) => {
                if tx.send(ServerEvent::LineFrom { id, line }).is_err() {
                    break; // Main thread dropped the receiver.
                }
            }
            Ok(None) => {
                // Zero-length read: orderly peer close.
                let _ = tx.send(ServerEvent::Disconnected { id });
                break;
            }
            Err(_) => {
                // Read error or poisoned framing — disconnect.
                let _ = tx.send(ServerEvent::Disconnected { id });
                break;
            }
        }
    }
}
