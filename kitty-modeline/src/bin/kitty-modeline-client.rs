// kitty-modeline-client: push the shell's prompt state to its terminal's daemon
//
// Commands:
//   kitty-modeline-client [--tty <path>] [--stdin]
//   kitty-modeline-client shell-integration [--install | --uninstall | --print] [--shell <zsh|bash|fish>] [--rc-file <path>]
//
// Delivery goes over the rendezvous channel; when no daemon is listening the
// update is left in the handoff store for the daemon to pick up at startup.

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use kitty_modeline::modeline::{
    address::TerminalKey,
    channel::{self, ChannelAddress},
    codec::{self, EnvironmentSnapshot, MAX_PAYLOAD_SIZE},
    config::Config,
    error::ModelineError,
    handoff::HandoffStore,
    logging,
    shell_integration::{self, ShellType},
};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kitty-modeline-client",
    version,
    about = "Send prompt state to the kitty-modeline daemon of this terminal"
)]
struct Cli {
    /// Terminal device to address instead of the one on stdout
    #[arg(long)]
    tty: Option<PathBuf>,

    /// Forward an already encoded payload read from stdin
    #[arg(long)]
    stdin: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install, remove or print the shell hook
    ShellIntegration(ShellIntegrationArgs),
}

#[derive(Debug, ClapArgs)]
#[command(group = clap::ArgGroup::new("action").args(["install", "uninstall", "print"]))]
struct ShellIntegrationArgs {
    /// zsh, bash or fish (defaults to $SHELL)
    #[arg(long)]
    shell: Option<String>,

    #[arg(long)]
    install: bool,

    #[arg(long)]
    uninstall: bool,

    /// Print the hook instead of touching any file (default)
    #[arg(long)]
    print: bool,

    /// Rc file to edit instead of the shell's default
    #[arg(long)]
    rc_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    logging::init_stderr("warn");
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Command::ShellIntegration(args)) => run_shell_integration(args),
        None => push_update(cli.tty, cli.stdin),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("kitty-modeline-client: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn push_update(tty: Option<PathBuf>, from_stdin: bool) -> Result<()> {
    let config = Config::from_env();

    let key = match tty {
        Some(path) => TerminalKey::from_device_path(path),
        None => TerminalKey::for_stdout().context("cannot determine terminal")?,
    };

    let payload = if from_stdin {
        read_stdin_payload()?
    } else {
        codec::encode(&EnvironmentSnapshot::from_current_process())
            .context("failed to encode environment")?
    };

    let address = ChannelAddress::for_key(&key, &config.handoff_dir);
    match channel::send(&address, &payload) {
        Ok(()) => {
            tracing::debug!(address = %address, bytes = payload.len(), "update delivered");
            Ok(())
        }
        Err(e @ ModelineError::Socket(_)) => Err(e).context("cannot reach any daemon"),
        Err(e) => {
            tracing::debug!(error = %e, "daemon not reachable, storing update");
            HandoffStore::new(&config.handoff_dir)
                .publish(&key, &payload)
                .context("failed to store pending update")
        }
    }
}

/// Read at most one payload worth of bytes; more than that is an error
fn read_stdin_payload() -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    std::io::stdin()
        .lock()
        .take(MAX_PAYLOAD_SIZE as u64 + 1)
        .read_to_end(&mut payload)
        .context("failed to read payload from stdin")?;

    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ModelineError::PayloadTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_SIZE,
        }
        .into());
    }
    Ok(payload)
}

fn run_shell_integration(args: ShellIntegrationArgs) -> Result<()> {
    let shell = match &args.shell {
        Some(name) => name.parse::<ShellType>()?,
        None => ShellType::detect()
            .ok_or_else(|| anyhow!("Could not detect shell from $SHELL; pass --shell"))?,
    };

    if args.install {
        let rc_file = shell_integration::install(shell, args.rc_file)?;
        println!("Installed {} hook in {}", shell, rc_file.display());
        println!("Restart your shell or source the file to activate it.");
    } else if args.uninstall {
        let rc_file = match args.rc_file {
            Some(path) => path,
            None => shell.rc_file_path()?,
        };
        if shell_integration::uninstall(&rc_file)? {
            println!("Removed hook from {}", rc_file.display());
        } else {
            println!("No hook found in {}", rc_file.display());
        }
    } else {
        println!("{}", shell.hook_snippet());
    }
    Ok(())
}
