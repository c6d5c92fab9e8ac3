//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `storekit_core` linkage and adapter registration.
//! - Print the supported backend types with their required properties.
//!
//! Usage: `storekit [backends.json]`. Set `STOREKIT_LOG_DIR` to an absolute
//! directory to enable file logging.

use log::info;
use std::env;
use std::process::ExitCode;
use storekit_core::{
    core_version, default_log_level, init_logging, register_all, BackendManager, BackendsConfig,
};

const LOG_DIR_ENV: &str = "STOREKIT_LOG_DIR";

fn main() -> ExitCode {
    println!("storekit_core version={}", core_version());

    if let Ok(log_dir) = env::var(LOG_DIR_ENV) {
        if let Err(err) = init_logging(default_log_level().as_str(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let config = match env::args().nth(1) {
        Some(path) => match BackendsConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("cannot load `{path}`: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => BackendsConfig::new(),
    };

    let manager = BackendManager::new(config);
    register_all(&manager);
    info!(
        "event=cli_start module=cli status=ok configured={}",
        manager.config().backend_types().join(",")
    );

    for backend_type in manager.get_supported_backends() {
        let configured = manager.config().get(&backend_type).is_some();
        println!("backend={backend_type} configured={configured}");
        if let Ok(properties) = manager.get_required_backend_properties(&backend_type) {
            for (key, hint) in properties {
                println!("  requires {key}: {hint}");
            }
        }
    }

    ExitCode::SUCCESS
}
