// CLI entry point for the Palaver chat relay server.
//
// Loads the configuration, initializes logging, and starts the relay. The
// process runs until the moderator issues `!shutdown` or the listening
// socket fails; SIGINT/SIGTERM end it directly, which is fine for a relay
// that keeps no state beyond the live connection set.
//
// Usage:
//   palaver-server [OPTIONS]
//     --config <PATH>     Config file (default: palaver.toml; missing file
//                         means built-in defaults)
//     --address <ADDR>    Bind address (overrides the config)
//     --port <PORT>       Listen port (overrides the config)

use palaver_relay::config::ServerConfig;
use palaver_relay::server::start_server;

fn main() {
    let args = parse_args();

    let mut config = match ServerConfig::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    init_logging();

    let (handle, addr) = match start_server(config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "relay listening");
    println!("Palaver relay listening on {addr}");
    println!("Press Ctrl+C to stop.");

    handle.join();
}

struct CliArgs {
    config_path: String,
    address: Option<String>,
    port: Option<u16>,
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching —
/// no clap dependency.
fn parse_args() -> CliArgs {
    let mut parsed = CliArgs {
        config_path: "palaver.toml".into(),
        address: None,
        port: None,
    };
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                parsed.config_path = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--config requires a path");
                    std::process::exit(1);
                });
            }
            "--address" => {
                i += 1;
                parsed.address = args.get(i).cloned().or_else(|| {
                    eprintln!("--address requires a value");
                    std::process::exit(1);
                });
            }
            "--port" => {
                i += 1;
                parsed.port = Some(args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(
                    || {
                        eprintln!("--port requires a valid port number");
                        std::process::exit(1);
                    },
                ));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_usage() {
    println!("Usage: palaver-server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <PATH>     Config file (default: palaver.toml)");
    println!("  --address <ADDR>    Bind address (overrides the config)");
    println!("  --port <PORT>       Listen port (overrides the config)");
    println!("  --help, -h          Show this help");
}

/// Initialize tracing-subscriber; `RUST_LOG` overrides the default level.
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
