// ftail - main.rs
//
// CLI host binary. Thin shell around the library's `Config`/`Ftail`: parse
// arguments, load/override configuration, wire up Ctrl-C cancellation, run
// the orchestrator to completion. Built with `clap::Parser` the way
// `logsleuth::main.rs`'s `Cli` struct is, exposing the options spec.md §6
// names as flags instead of a GUI surface.

use ftail::config;
use ftail::ftail as core;
use ftail::util;

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// ftail - durable log-tailing buffer.
///
/// Follows a rotating log file and writes compressed, time-segmented record
/// stores under `--bufdir` for a downstream shipper to pick up.
#[derive(Parser, Debug)]
#[command(name = "ftail", version, about)]
struct Cli {
    /// Logical source name (used in buffer paths). Overrides the config
    /// file's `name` when given.
    #[arg(short = 'n', long = "name")]
    name: Option<String>,

    /// Root directory for buffer segments. Overrides the config file's
    /// `buf_dir` when given.
    #[arg(short = 'b', long = "bufdir")]
    bufdir: Option<PathBuf>,

    /// Path to a TOML configuration file. Defaults to `ftail.toml` in the
    /// current directory when omitted.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(ftail::util::constants::CONFIG_FILE_NAME));

    let mut cfg = match config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging isn't initialised yet on a config-load failure; this is
            // a startup-time error the operator needs on stderr regardless.
            eprintln!("ftail: failed to load config '{}': {e}", config_path.display());
            std::process::exit(1);
        }
    };
    if let Some(name) = cli.name {
        cfg.name = name;
    }
    if let Some(bufdir) = cli.bufdir {
        cfg.buf_dir = bufdir;
    }

    util::logging::init(cli.debug, cfg.log_level.as_deref());

    tracing::info!(
        version = util::constants::APP_VERSION,
        name = %cfg.name,
        buf_dir = %cfg.buf_dir.display(),
        "ftail starting"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        if let Err(e) = ctrlc_handler(cancel) {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler; only SIGKILL will stop this process");
        }
    }

    let orchestrator = match core::Ftail::new(cfg) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "ftail: startup failed");
            std::process::exit(1);
        }
    };

    match orchestrator.run(cancel) {
        Ok(()) => {
            tracing::info!("ftail: clean shutdown");
        }
        Err(e) => {
            tracing::error!(error = %e, "ftail: exited with error");
            std::process::exit(1);
        }
    }
}

/// Install a Ctrl-C/SIGTERM handler that flips `cancel` exactly once.
fn ctrlc_handler(cancel: Arc<AtomicBool>) -> Result<(), String> {
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::Release);
    })
    .map_err(|e| e.to_string())
}
