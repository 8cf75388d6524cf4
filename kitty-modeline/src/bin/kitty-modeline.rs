// kitty-modeline: per-terminal status line daemon
//
// Responsibilities:
// - Own the rendezvous address of one terminal (a second instance exits 1)
// - Pick up an update that was stored before the daemon started listening
// - Render every received update, newest cancelling whatever is in flight
// - Write the rendered line to stdout, which belongs to the terminal

use anyhow::{Context, Result};
use clap::Parser;
use kitty_modeline::modeline::{
    address::TerminalKey,
    channel::{ChannelAddress, Listener},
    codec,
    config::{self, Config},
    coordinator::Coordinator,
    handoff::HandoffStore,
    logging::{self, LogTarget},
    render::Renderer,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};

#[derive(Debug, Parser)]
#[command(name = "kitty-modeline", version, about = "Render a status line for one terminal")]
struct Args {
    /// Terminal device this daemon serves, e.g. /dev/pts/3
    tty: PathBuf,

    /// Renderer program (name on PATH or path)
    #[arg(long, env = config::RENDERER_ENV)]
    renderer: Option<String>,

    /// Kill renders running longer than this many milliseconds (0 disables)
    #[arg(long, env = config::RENDER_TIMEOUT_ENV)]
    render_timeout_ms: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(renderer) = args.renderer.as_deref().filter(|r| !r.trim().is_empty()) {
        config.renderer = renderer.to_string();
    }
    if let Some(raw) = &args.render_timeout_ms {
        config.render_timeout = config::parse_timeout_ms(raw);
    }

    if let LogTarget::Stderr(e) = logging::init(&config.log_file, &args.log_level) {
        eprintln!(
            "kitty-modeline: cannot open {} ({}), logging to stderr",
            config.log_file.display(),
            e
        );
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("kitty-modeline: failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config, &args.tty)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "daemon exiting");
            eprintln!("kitty-modeline: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config, tty: &Path) -> Result<()> {
    let key = TerminalKey::from_device_path(tty);

    // Needed for the socket file where abstract names are unavailable
    if let Err(e) = config.ensure_handoff_dir() {
        tracing::warn!(dir = %config.handoff_dir.display(), error = %e, "cannot create handoff directory");
    }

    // Listen before draining: an update published meanwhile is either
    // delivered live or still on disk
    let address = ChannelAddress::for_key(&key, &config.handoff_dir);
    let mut listener = match Listener::bind(&address) {
        Ok(listener) => listener,
        Err(e) if e.is_address_in_use() => {
            anyhow::bail!("a daemon is already serving {}: {}", tty.display(), e)
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        key = %key,
        address = %listener.address(),
        channel = listener.address().name(),
        renderer = %config.renderer,
        timeout = ?config.render_timeout,
        "daemon listening"
    );

    let renderer = Renderer::new(config.renderer.clone(), config.render_timeout);
    let mut coordinator = Coordinator::new(renderer, std::io::stdout());

    let store = HandoffStore::new(&config.handoff_dir);
    match store.consume(&key) {
        Ok(Some(payload)) => {
            tracing::info!(bytes = payload.len(), "rendering update stored before startup");
            coordinator.handle_update(codec::decode(&payload)).await;
        }
        Ok(None) => {}
        Err(e) => tracing::error!(error = %e, "failed to drain handoff store"),
    }

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            received = listener.recv() => match received {
                Ok(payload) => {
                    tracing::debug!(bytes = payload.len(), "update received");
                    coordinator.handle_update(codec::decode(&payload)).await;
                }
                Err(e) => tracing::error!(error = %e, "receive failed"),
            },

            Some(outcome) = coordinator.next_outcome() => {
                if let Err(e) = coordinator.handle_outcome(outcome) {
                    tracing::error!(error = %e, "failed to write status line");
                }
            }

            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received");
                break;
            }
            _ = sigint.recv() => {
                tracing::info!("SIGINT received");
                break;
            }
            _ = sighup.recv() => {
                tracing::info!("terminal hung up");
                break;
            }
        }
    }

    coordinator.cancel_current().await;
    let _ = coordinator.into_output().flush();

    tracing::info!(key = %key, "daemon stopped");
    Ok(())
}
