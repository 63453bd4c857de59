//! farhand CLI: drive keyboard, mouse and clipboard on a remote machine.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use farhand_clipboard::ClipboardProvider;
use farhand_input::{ChannelSource, InputError, InputSink};
use farhand_session::setup::load_config;
use farhand_session::{
    connect_to_peer, start_listening, ClientBackends, Config, ServerBackends, SessionError,
    SessionHandle, SessionState,
};
use farhand_types::InputEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::commands::{Command, CommandParser};

#[derive(Parser)]
#[command(
    name = "farhand",
    about = "Drive keyboard, mouse and clipboard on a remote machine",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for one client and inject its input here.
    ///
    /// Serves a single session. Run it again to accept another client once
    /// that session has ended.
    Listen {
        /// Address to bind.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,

        /// Shared session password.
        #[arg(long, env = "FARHAND_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Connect to a listening machine and send it input read from stdin.
    Connect {
        /// Address of the remote machine.
        address: Option<String>,

        /// Port of the remote machine.
        #[arg(short, long)]
        port: Option<u16>,

        /// Shared session password.
        #[arg(long, env = "FARHAND_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Commands::Listen {
            bind,
            port,
            password,
        } => listen(config, bind, port, &password).await,
        Commands::Connect {
            address,
            port,
            password,
        } => connect(config, address, port, &password).await,
    }
}

async fn listen(
    config: Config,
    bind: Option<String>,
    port: Option<u16>,
    password: &str,
) -> anyhow::Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let port = port.unwrap_or(config.server.port);
    let backends = ServerBackends {
        sink: Arc::new(LoggingSink),
        clipboard: local_clipboard(),
    };
    let mut session = start_listening(&bind, port, password, backends, config).await?;
    if let Some(addr) = session.local_addr() {
        println!("listening on {addr}");
    }

    tokio::spawn(print_states(session.observe_state()));
    let mut states = session.observe_state();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            shut_down(&mut session).await;
        }
        () = until_terminal(&mut states) => {}
    }
    finish(session).await
}

async fn connect(
    config: Config,
    address: Option<String>,
    port: Option<u16>,
    password: &str,
) -> anyhow::Result<()> {
    let address = address
        .or_else(|| config.peer.address.clone())
        .context("no address given and no [peer] address configured")?;
    let port = port.unwrap_or(config.peer.port);

    let (source, feed) = ChannelSource::new();
    let backends = ClientBackends {
        source: Box::new(source),
        clipboard: local_clipboard(),
    };
    let mut session = connect_to_peer(&address, port, password, backends, config);
    tokio::spawn(print_states(session.observe_state()));

    let mut states = session.observe_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut parser = CommandParser::new();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match parser.parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        eprintln!("{e:#}");
                        continue;
                    }
                };
                match command {
                    Command::Input(events) => {
                        for event in events {
                            if feed.send(event).await.is_err() {
                                warn!("input source is closed");
                            }
                        }
                    }
                    Command::Suspend => report(session.request_suspend().await),
                    Command::Resume => report(session.request_resume().await),
                    Command::Close => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            () = until_terminal(&mut states) => break,
        }
    }

    shut_down(&mut session).await;
    finish(session).await
}

/// Close a running session or abandon one still being set up.
/// A second Ctrl-C while the close is pending drops the session outright.
async fn shut_down(session: &mut SessionHandle) {
    if session.state().is_established() {
        let interrupted = tokio::select! {
            result = session.request_close() => {
                report(result);
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            warn!("interrupted again, aborting session");
            session.abort();
        }
    } else {
        session.stop_listening();
    }
}

async fn until_terminal(states: &mut watch::Receiver<SessionState>) {
    while !states.borrow_and_update().is_terminal() {
        if states.changed().await.is_err() {
            return;
        }
    }
}

async fn print_states(mut states: watch::Receiver<SessionState>) {
    loop {
        let state = *states.borrow_and_update();
        println!("session: {state}");
        if state.is_terminal() || states.changed().await.is_err() {
            return;
        }
    }
}

async fn finish(session: SessionHandle) -> anyhow::Result<()> {
    until_terminal(&mut session.observe_state()).await;
    let failure = session.failure();
    match session.join().await {
        SessionState::Crashed => {
            anyhow::bail!("session crashed: {}", failure.unwrap_or_default())
        }
        state => {
            println!("session ended: {state}");
            Ok(())
        }
    }
}

fn report(result: Result<(), SessionError>) {
    if let Err(e) = result {
        eprintln!("request failed: {e}");
    }
}

/// Sink for `listen`: logs each event instead of touching the OS.
struct LoggingSink;

#[async_trait]
impl InputSink for LoggingSink {
    async fn inject(&self, event: InputEvent) -> Result<(), InputError> {
        info!(?event, "inject");
        Ok(())
    }
}

#[cfg(feature = "system-clipboard")]
fn local_clipboard() -> Box<dyn ClipboardProvider> {
    Box::new(farhand_clipboard::SystemClipboard::new())
}

#[cfg(not(feature = "system-clipboard"))]
fn local_clipboard() -> Box<dyn ClipboardProvider> {
    Box::new(farhand_clipboard::MemoryClipboard::new())
}
