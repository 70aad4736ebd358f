// Interactive terminal client for the Palaver chat relay.
//
// Two activities so a typing human never blocks incoming traffic: the main
// thread reads stdin and writes to the socket; a reader thread prints every
// server line as it arrives. The only shared state between them is the
// socket itself and a keep-running flag — the flag's SeqCst writes are
// visible to the other side before its next check.
//
// Usage:
//   palaver-client <server_ip> <server_port>

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use palaver_protocol::framing::{read_line, write_line};
use palaver_protocol::{PASSWORD_PROMPT, WELCOME_PREFIX};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: palaver-client <server_ip> <server_port>");
        std::process::exit(1);
    }
    let addr = format!("{}:{}", args[1], args[2]);

    let stream = match TcpStream::connect(&addr) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Failed to connect to the server at {addr}: {e}");
            std::process::exit(1);
        }
    };
    println!("Connected to the server at {addr}.");

    let mut reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(e) => {
            eprintln!("Failed to set up the connection: {e}");
            std::process::exit(1);
        }
    };
    let mut writer = stream;

    // The server rejects empty pseudonyms; re-prompt locally first.
    let pseudonym = loop {
        let entered = prompt("Enter your pseudonym: ");
        let trimmed = entered.trim();
        if !trimmed.is_empty() {
            break trimmed.to_owned();
        }
        println!("Pseudonym cannot be empty. Please enter a valid pseudonym.");
    };
    if write_line(&mut writer, &pseudonym).is_err() {
        eprintln!("Failed to send pseudonym.");
        std::process::exit(1);
    }

    // Handshake: the first server line is the welcome, the moderator
    // password challenge, or a rejection.
    let mut first = expect_line(&mut reader);
    if first == PASSWORD_PROMPT {
        let password = prompt("Password: ");
        if write_line(&mut writer, password.trim()).is_err() {
            eprintln!("Failed to send password.");
            std::process::exit(1);
        }
        first = expect_line(&mut reader);
    }
    if !first.starts_with(WELCOME_PREFIX) {
        println!("{first}");
        std::process::exit(1);
    }
    println!("{first}");
    println!("Type a message, @name for private messages, !list for the roster, quit to leave.");

    let running = Arc::new(AtomicBool::new(true));
    let running_reader = running.clone();
    thread::spawn(move || {
        loop {
            match read_line(&mut reader) {
                Ok(Some(line)) => println!("{line}"),
                _ => {
                    println!("Server has disconnected.");
                    running_reader.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    });

    // Input loop. `quit` asks the server for an orderly logout.
    let stdin = std::io::stdin();
    let mut input = String::new();
    while running.load(Ordering::SeqCst) {
        input.clear();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => break, // stdin closed
            Ok(_) => {}
        }
        let text = input.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("quit") {
            let _ = write_line(&mut writer, "!logout");
            break;
        }
        if write_line(&mut writer, text).is_err() {
            println!("Lost connection to the server.");
            break;
        }
    }
    running.store(false, Ordering::SeqCst);
}

fn expect_line(reader: &mut BufReader<TcpStream>) -> String {
    match read_line(reader) {
        Ok(Some(line)) => line,
        _ => {
            eprintln!("Server closed the connection.");
            std::process::exit(1);
        }
    }
}

fn prompt(text: &str) -> String {
    print!("{text}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    line
}
