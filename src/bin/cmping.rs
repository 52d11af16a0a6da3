use anyhow::{Context, Result};
use clap::Parser;
use cmping::ping::{init_logging_with_config, Config, ExitStatus, PingError, Session};
use cmping::relay::RpcClient;
use cmping::{CancelReason, CancelToken};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

fn main() {
    let config = Config::parse();

    init_logging_with_config(config.log_level(), config.is_json_format());

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match run(config) {
        Ok(status) => std::process::exit(status.code()),
        Err(e) => {
            error!(error = %e, "cmping failed");
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(config: Config) -> Result<ExitStatus> {
    let accounts_dir = config.accounts_dir()?;
    std::fs::create_dir_all(&accounts_dir).with_context(|| {
        format!(
            "Failed to create accounts directory {}",
            accounts_dir.display()
        )
    })?;
    println!("# using accounts_dir at: {}", accounts_dir.display());

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel)?;

    let client = RpcClient::spawn(&config.rpc_server, &accounts_dir).with_context(|| {
        format!("Failed to start RPC server '{}'", config.rpc_server)
    })?;
    info!(rpc_server = %config.rpc_server, "RPC server started");

    let session = Session::new(Arc::new(client), config.ping_options()?, cancel);
    let stdout = std::io::stdout();
    let result = session.run(&mut stdout.lock());
    drop(session);

    match result {
        Ok(outcome) => {
            if let Some(e) = &outcome.emitter_error {
                warn!(error = %e, "Probe sending stopped early");
            }
            Ok(outcome.exit_status())
        }
        Err(PingError::Cancelled(CancelReason::Interrupted)) => {
            debug!("Interrupted during setup");
            Ok(ExitStatus::Interrupted)
        }
        Err(e) => Err(e.into()),
    }
}

/// Cancel `cancel` on SIGINT/SIGTERM. A second signal exits immediately.
fn install_interrupt_handler(cancel: &CancelToken) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    let cancel = cancel.clone();
    thread::Builder::new()
        .name("signal-handler".into())
        .spawn(move || {
            let mut interrupted = false;
            for signal in signals.forever() {
                if interrupted {
                    warn!(signal, "Second interrupt, exiting");
                    std::process::exit(ExitStatus::Interrupted.code());
                }
                interrupted = true;
                cancel.cancel(CancelReason::Interrupted);
                info!(signal, "Interrupt received, finishing session");
            }
        })
        .context("Failed to spawn signal handler thread")?;
    Ok(())
}
