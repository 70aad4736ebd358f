// TCP client for connecting to the chat relay.
//
// Provides a non-blocking interface for embedding or testing a chat
// participant. Architecture:
// - `connect()` performs TCP connect + the pseudonym/password handshake on
//   the calling thread, then spawns a background reader thread.
// - The reader thread calls `read_line()` in a loop and pushes each server
//   line into an `mpsc` channel.
// - The caller holds the write half for sending.
// - `poll()` drains the inbox non-blocking; `wait_for_line()` blocks with a
//   timeout for test-friendly sequencing.
//
// This separation ensures the caller never blocks on network reads. The
// terminal client binary drives its own stdin/reader threads instead (the
// password prompt there is interactive), but shares the same framing.

use std::io::BufReader;
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use palaver_protocol::framing::{read_line, write_line};
use palaver_protocol::{PASSWORD_PROMPT, WELCOME_PREFIX};

/// Chat client handle: write half plus an inbox of server lines.
#[derive(Debug)]
pub struct NetClient {
    writer: TcpStream,
    inbox: Receiver<String>,
    _reader_thread: Option<JoinHandle<()>>,
}

impl NetClient {
    /// Connect to a relay, perform the handshake, and spawn a reader
    /// thread. `password` is only consulted if the server issues the
    /// moderator challenge. Returns the client and the welcome line.
    pub fn connect(
        addr: &str,
        pseudonym: &str,
        password: Option<&str>,
    ) -> Result<(Self, String), String> {
        let stream = TcpStream::connect(addr).map_err(|e| format!("connect failed: {e}"))?;

        // Handshake read timeout so a dead server doesn't block forever.
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .ok();

        let reader_stream = stream
            .try_clone()
            .map_err(|e| format!("clone failed: {e}"))?;
        let mut reader = BufReader::new(reader_stream);
        let mut writer = stream;

        write_line(&mut writer, pseudonym).map_err(|e| format!("send pseudonym failed: {e}"))?;

        let mut first = read_handshake_line(&mut reader)?;
        if first == PASSWORD_PROMPT {
            let password = password.ok_or("server requires the moderator password")?;
            write_line(&mut writer, password)
                .map_err(|e| format!("send password failed: {e}"))?;
            first = read_handshake_line(&mut reader)?;
        }
        if !first.starts_with(WELCOME_PREFIX) {
            return Err(format!("rejected: {first}"));
        }

        // Clear the handshake timeout for the long-lived reader loop (the
        // socket option is shared with the reader's clone).
        writer.set_read_timeout(None).ok();

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            reader_loop(reader, tx);
        });

        Ok((
            Self {
                writer,
                inbox: rx,
                _reader_thread: Some(reader_thread),
            },
            first,
        ))
    }

    /// Send one chat line (message or command).
    pub fn send_line(&mut self, text: &str) -> Result<(), String> {
        write_line(&mut self.writer, text).map_err(|e| format!("send failed: {e}"))
    }

    /// Ask the server for an orderly logout.
    pub fn send_logout(&mut self) {
        let _ = write_line(&mut self.writer, "!logout");
    }

    /// Drain all queued server lines (non-blocking).
    pub fn poll(&self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.inbox.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Block up to `timeout` for the next server line. `None` on timeout or
    /// once the connection is gone and the inbox is drained.
    pub fn wait_for_line(&self, timeout: Duration) -> Option<String> {
        self.inbox.recv_timeout(timeout).ok()
    }
}

fn read_handshake_line(reader: &mut BufReader<TcpStream>) -> Result<String, String> {
    match read_line(reader) {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err("server closed the connection during the handshake".into()),
        Err(e) => Err(format!("handshake read failed: {e}")),
    }
}

/// Reader thread: push each server line into the channel. Exits — dropping
/// the sender and thereby closing the inbox — when the server goes away.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<String>) {
    while let Ok(Some(line)) = read_line(&mut reader) {
        if tx.send(line).is_err() {
            break; // Consumer dropped the receiver.
        }
    }
}
