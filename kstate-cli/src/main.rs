//! Command-line companion to the `kstate` library: a sweeper for stray
//! shared-memory objects left behind by crashed or killed processes, and a
//! small inspect/set tool for scripting against named states.

use clap::{Parser, Subcommand};
use kstate_base::{invalid_argument, os_error, Result};
use kstate_core::{validate_name, Permissions};
use kstate_shm::unlink;
use kstate_state::State;
use kstate_txn::Transaction;
use std::fs;
use std::process::ExitCode;
use tracing::{debug, info};

const SHM_DIR: &str = "/dev/shm";

#[derive(Parser)]
#[command(name = "kstate", about = "Inspect and sweep kstate shared regions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Unlink stray kstate shared-memory objects from /dev/shm.
    Sweep {
        /// Only unlink names starting with this user-name prefix.
        #[arg(long)]
        prefix: Option<String>,
        /// List what would be unlinked without unlinking it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a subscribed state's id, permissions and contents.
    Show { name: String },
    /// Start a write transaction against a state and commit the given bytes.
    Set {
        name: String,
        /// Bytes to write, as a hex string (e.g. "deadbeef").
        hex: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Sweep { prefix, dry_run } => sweep(prefix.as_deref(), dry_run),
        Command::Show { name } => show(&name),
        Command::Set { name, hex } => set(&name, &hex),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("kstate: {e}");
            ExitCode::FAILURE
        }
    }
}

fn io_err(e: std::io::Error) -> kstate_base::Error {
    os_error(e.raw_os_error().unwrap_or(libc::EIO))
}

fn sweep(prefix: Option<&str>, dry_run: bool) -> Result<()> {
    info!(?prefix, dry_run, "sweeping {SHM_DIR}");
    for entry in fs::read_dir(SHM_DIR).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let filename = entry.file_name();
        let Some(filename) = filename.to_str() else {
            continue;
        };
        let Some(user) = filename.strip_prefix("kstate.") else {
            continue;
        };
        if let Some(prefix) = prefix {
            if !user.starts_with(prefix) {
                continue;
            }
        }
        let canonical = format!("/kstate.{user}");
        if dry_run {
            println!("would unlink {canonical}");
        } else {
            unlink(&canonical)?;
            debug!(name = canonical, "unlinked");
            println!("unlinked {canonical}");
        }
    }
    Ok(())
}

fn show(name: &str) -> Result<()> {
    validate_name("kstate show", name)?;
    debug!(name, "showing state");
    let mut state = State::new();
    state.subscribe(name, Permissions::READ.bits())?;
    println!("{state}");
    println!("{:02x?}", state.view().unwrap());
    state.unsubscribe()
}

fn set(name: &str, hex: &str) -> Result<()> {
    let bytes = parse_hex(hex)?;
    info!(name, bytes = bytes.len(), "setting state contents");
    let mut state = State::new();
    state.subscribe(name, Permissions::WRITE.bits())?;
    let mut txn = Transaction::new();
    txn.start(&state, Permissions::WRITE.bits())?;
    let view = txn
        .view_mut()
        .expect("write transaction always has a mutable view");
    let len = bytes.len().min(view.len());
    view[..len].copy_from_slice(&bytes[..len]);
    txn.commit()?;
    state.unsubscribe()
}

fn parse_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(invalid_argument(
            "hex string must have an even number of digits",
        ));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| invalid_argument(format!("invalid hex byte '{}'", &hex[i..i + 2])))
        })
        .collect()
}
