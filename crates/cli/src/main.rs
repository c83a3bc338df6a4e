mod commands;
mod observer;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use natter_core::config::{Config, ConfigError};
use natter_core::{MessageKind, NatterError};
use natter_roster::RosterKind;
use natter_xmpp::{NativeSession, SessionError, SessionState};

use commands::Command;
use observer::ConsoleObserver;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// natter - console XMPP client
#[derive(Parser)]
#[command(name = "natter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print debug-level session log lines
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Failed to load config: {error}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    if let Err(error) = run(&config, cli.verbose).await {
        eprintln!("natter: {error}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    Config::load(&path)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: &Config, verbose: bool) -> natter_core::Result<()> {
    let mut session = NativeSession::new(config, ConsoleObserver::new(verbose))
        .map_err(|error| NatterError::Xmpp(error.to_string()))?;
    session
        .connect()
        .await
        .map_err(|error| NatterError::Xmpp(error.to_string()))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_input(tx.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(Command::Quit);
        }
    });

    while session.poll(POLL_INTERVAL).await != SessionState::Disconnected {
        while let Ok(command) = rx.try_recv() {
            if command == Command::Quit {
                session.disconnect().await;
                return Ok(());
            }
            if let Err(error) = execute(&mut session, command).await {
                warn!(%error, "command failed");
                eprintln!("{error}");
            }
        }
    }

    Ok(())
}

/// Forwards parsed stdin commands. End of input quits.
fn spawn_input(tx: mpsc::UnboundedSender<Command>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("standard input closed");
                    break;
                }
                Err(error) => {
                    warn!(%error, "failed to read standard input");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match commands::parse(&line) {
                Ok(command) => {
                    if tx.send(command).is_err() {
                        return;
                    }
                }
                Err(error) => eprintln!("{error}"),
            }
        }
        let _ = tx.send(Command::Quit);
    });
}

async fn execute(
    session: &mut NativeSession<ConsoleObserver>,
    command: Command,
) -> Result<(), SessionError> {
    match command {
        Command::Message { to, body } => {
            let is_room = session
                .roster()
                .lookup(&to)
                .is_some_and(|entry| entry.kind == RosterKind::Room);
            let kind = if is_room {
                MessageKind::Groupchat
            } else {
                MessageKind::Chat
            };
            session.send_message(&to, kind, &body).await
        }
        Command::Status { status, message } => session.set_status(status, message.as_deref()).await,
        Command::Join { room, nickname } => {
            session.join_room(&room, nickname.as_deref(), None).await
        }
        Command::Add { jid, name } => session.add_buddy(&jid, name.as_deref(), None).await,
        Command::Remove { jid } => session.remove_buddy(&jid).await,
        Command::Rename { jid, name } => {
            let group = session
                .roster()
                .lookup(&jid)
                .and_then(|entry| entry.group.clone());
            session.update_buddy(&jid, &name, group.as_deref()).await
        }
        Command::Info { query, jid } => session.request_info(&jid, query).await.map(|_| ()),
        Command::Note { jid: contact, text } => {
            session.set_roster_note(&contact, text.as_deref()).await
        }
        Command::Quit => Ok(()),
    }
}
