//! memlink - memcached connection probe
//!
//! Opens one connection to a memcached server, sends a single command and
//! prints the parsed response. Handy for checking that a server is up and
//! for watching the connection layer's logs (`RUST_LOG=memlink=trace`).

use anyhow::Context;
use memlink::commands::RawCommand;
use memlink::connection::{
    Authentication, BlockingConnection, ConnectionConfig, MemcachedHost, PipelinedConnection,
};
use memlink::Response;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Probe configuration
struct Config {
    host: String,
    port: u16,
    blocking: bool,
    timeout: Duration,
    keep_alive: Option<Duration>,
    user: Option<String>,
    password: Option<String>,
    /// Command line to send, CRLF appended
    command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: memlink::DEFAULT_HOST.to_string(),
            port: memlink::DEFAULT_PORT,
            blocking: false,
            timeout: Duration::from_secs(2),
            keep_alive: Some(Duration::from_secs(30)),
            user: None,
            password: None,
            command: "version".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();
        let mut words = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = value_of(&args, i, "--host");
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = value_of(&args, i, "--port").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--timeout-ms" => {
                    let millis: u64 = value_of(&args, i, "--timeout-ms").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid timeout");
                        std::process::exit(1);
                    });
                    config.timeout = Duration::from_millis(millis);
                    i += 2;
                }
                "--keepalive-secs" => {
                    let secs: u64 = value_of(&args, i, "--keepalive-secs").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid keepalive");
                        std::process::exit(1);
                    });
                    // Zero disables probing
                    config.keep_alive = (secs > 0).then(|| Duration::from_secs(secs));
                    i += 2;
                }
                "--user" => {
                    config.user = Some(value_of(&args, i, "--user"));
                    i += 2;
                }
                "--password" => {
                    config.password = Some(value_of(&args, i, "--password"));
                    i += 2;
                }
                "--blocking" => {
                    config.blocking = true;
                    i += 1;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("memlink version {}", memlink::VERSION);
                    std::process::exit(0);
                }
                arg if arg.starts_with("--") => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
                word => {
                    words.push(word.to_string());
                    i += 1;
                }
            }
        }

        if !words.is_empty() {
            config.command = unescape(&words.join(" "));
        }
        config
    }

    fn connection_config(&self) -> ConnectionConfig {
        let mut connection = ConnectionConfig::default()
            .with_default_request_timeout(Some(self.timeout))
            .with_keep_alive(self.keep_alive);

        if let Some(user) = &self.user {
            let password = self.password.clone().unwrap_or_default();
            connection = connection.with_authentication(Authentication::new(user.clone(), password));
        }
        connection
    }

    fn address(&self) -> anyhow::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("resolving {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("no address for {}:{}", self.host, self.port))
    }
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

/// Turns typed `\r\n` sequences into real ones so that storage commands
/// with a data block can be given on one line.
fn unescape(command: &str) -> String {
    command.replace("\\r\\n", "\r\n")
}

fn print_help() {
    println!(
        r#"
memlink - memcached connection probe

USAGE:
    memlink [OPTIONS] [COMMAND...]

OPTIONS:
    -h, --host <HOST>            Server host (default: 127.0.0.1)
    -p, --port <PORT>            Server port (default: 11211)
        --blocking               Use the one-request-at-a-time connection
        --timeout-ms <MS>        Request timeout (default: 2000)
        --keepalive-secs <SECS>  Idle probe period, 0 disables (default: 30)
        --user <USER>            Authenticate as USER
        --password <PASSWORD>    Password for --user
    -v, --version                Print version information
        --help                   Print this help message

EXAMPLES:
    memlink                                   # version
    memlink mg foo v                          # meta get
    memlink 'set foo 0 0 3\r\nbar'            # classic set
    RUST_LOG=memlink=trace memlink stats      # watch the wire
"#
    );
}

fn print_response(response: &Response) {
    println!("{}", response);
    if let Some(value) = response.value() {
        println!("{}", String::from_utf8_lossy(value));
    }
    for item in response.items().iter().skip(1) {
        println!("{} = {}", item.key, String::from_utf8_lossy(&item.data));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    // Set up logging, RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let host = MemcachedHost::new(format!("{}:{}", config.host, config.port), config.address()?);
    let coordinator = Arc::new(|host: &MemcachedHost| warn!(host = %host, "Connection lost"));
    let command = RawCommand::line(config.command.trim_end_matches("\r\n"));

    let response = if config.blocking {
        let connection = BlockingConnection::new(host, config.connection_config(), coordinator);
        connection.start().await.context("connecting")?;
        let response = connection.send(&command, None).await;
        info!(stats = ?connection.stats().snapshot(), "Done");
        connection.stop().await;
        response
    } else {
        let connection = PipelinedConnection::new(host, config.connection_config(), coordinator);
        connection.start().await.context("connecting")?;
        let response = connection.send(&command, None).await;
        info!(stats = ?connection.stats().snapshot(), "Done");
        connection.stop().await;
        response
    };

    print_response(&response?);
    Ok(())
}
