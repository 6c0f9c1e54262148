//! Omnilink CLI
//!
//! `omnilink probe <request.json>` tests an unsaved connection and prints the
//! outcome as JSON on stdout. Logs go to stderr.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use omnilink_lib::config::SettingsStorage;
use omnilink_lib::probe::{ConnectivityProber, NetworkDriver, ProbeOutcome, ProbeRequest};
use omnilink_lib::tunnel::TunnelBroker;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: omnilink probe <request.json>";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("omnilink {}", VERSION);
        return ExitCode::SUCCESS;
    }

    let path = match args.as_slice() {
        [_, command, path] if command == "probe" => path.clone(),
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    omnilink_lib::init_logging();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(probe_file(Path::new(&path)));
    match serde_json::to_string_pretty(&outcome) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode outcome: {}", e),
    }

    if outcome.is_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn probe_file(path: &Path) -> ProbeOutcome {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => return ProbeOutcome::failure(format!("Could not read {:?}: {}", path, e)),
    };
    let request: ProbeRequest = match serde_json::from_str(&content) {
        Ok(request) => request,
        Err(e) => return ProbeOutcome::failure(format!("Invalid probe request: {}", e)),
    };

    let settings = match SettingsStorage::new() {
        Ok(storage) => {
            tracing::debug!("Reading settings from {:?}", storage.path());
            match storage.load().await {
                Ok(settings) => settings,
                Err(e) => return ProbeOutcome::failure(e.to_string()),
            }
        }
        Err(e) => {
            tracing::warn!("No settings directory ({}), using defaults", e);
            Default::default()
        }
    };

    let prober = ConnectivityProber::new(
        Arc::new(NetworkDriver::default()),
        Arc::new(TunnelBroker::from_settings(&settings)),
        settings.connect_timeout(),
    );
    prober.probe(&request, None, None).await
}
