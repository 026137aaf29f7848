//! kdsh entry point.
//!
//! ```text
//! kdsh --host <host> --port <port> --username <name>   Log in and open the shell
//!      [--pass <password>] [--session-id <id>]
//! kdsh --config <path>                                 Load a custom config TOML
//! kdsh --download-dir <path>                           Override where files land
//! kdsh --gen-config                                    Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kdsh::config::ShellConfig;
use kdsh::repl::Repl;
use kdsh_core::{ChannelSink, Connection, ConnectionInfo, FsStorage, LoginRequest, MessageSink};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "kdsh", version, about = "KodData remote shell client")]
struct Cli {
    /// Server host name or address.
    #[arg(long, required_unless_present = "gen_config")]
    host: Option<String>,

    /// Server port.
    #[arg(long, required_unless_present = "gen_config")]
    port: Option<u16>,

    /// User to log in as.
    #[arg(long, required_unless_present = "gen_config")]
    username: Option<String>,

    /// Password (empty if omitted).
    #[arg(long, default_value = "")]
    pass: String,

    /// Session to attach to.
    #[arg(long, alias = "sessionId", default_value_t = 0, allow_negative_numbers = true)]
    session_id: i64,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "kdsh.toml")]
    config: PathBuf,

    /// Directory for files sent by the server.
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ShellConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    let (Some(host), Some(port), Some(username)) = (cli.host, cli.port, cli.username) else {
        return Err("--host, --port and --username are required".into());
    };

    // Load config.
    let mut config = ShellConfig::load(&cli.config);
    if let Some(dir) = cli.download_dir {
        config.transfer.download_dir = dir;
    }

    // Init tracing. Stdout belongs to the shell.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("kdsh v{}", env!("CARGO_PKG_VERSION"));

    // Everything the connection reports is printed by one task.
    let (sink, mut messages) = ChannelSink::new();
    let sink: Arc<dyn MessageSink> = Arc::new(sink);
    let printer = tokio::spawn(async move {
        while let Some(text) = messages.recv().await {
            println!("{text}");
        }
    });

    let info = ConnectionInfo::new(host, port);
    let conn = Connection::open(
        info.clone(),
        config.to_options(),
        Arc::clone(&sink),
        Arc::new(FsStorage),
    )
    .await?;

    let request = LoginRequest::new(username.clone(), cli.pass, cli.session_id);
    let accepted = match conn.login(&request).await {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!("login did not complete: {e}");
            false
        }
    };
    if !accepted {
        println!("Login failed: Invalid credentials or session.");
        conn.shutdown().await;
        std::process::exit(1);
    }

    let rule = "=====================================";
    sink.deliver(rule.into());
    sink.deliver("Welcome to KodData Shell v1.0!".into());
    sink.deliver(format!("User: {username}"));
    sink.deliver(format!("Connected to server at {info}"));
    sink.deliver(rule.into());

    let mut repl = Repl::new(&conn, Arc::clone(&sink), config.terminal.clone());
    let result = repl
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    drop(repl);
    conn.shutdown().await;
    drop(sink);
    // Let queued output drain before exiting.
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("printer did not finish");
    }

    result?;
    Ok(())
}
