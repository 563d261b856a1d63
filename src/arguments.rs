/// Centralized argument handling for the relay
///
/// Consolidates command-line argument access and debug flag checking so every
/// module asks the same question the same way.
///
/// Features:
/// - Centralized CMD_ARGS storage with thread-safe access
/// - Debug flag checking functions per module
/// - Help output
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
/// Thread-safe singleton that stores arguments for access throughout the application
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Sets the global command-line arguments
/// Used by tests to override the default env::args() collection
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
/// Returns a vector clone to avoid holding the mutex lock
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => {
            // Fallback to env::args if mutex is poisoned
            env::args().collect()
        }
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value of a command-line argument that follows a flag
/// Returns None if the flag is not found or has no value
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    for (i, arg) in args.iter().enumerate() {
        if arg == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

// =============================================================================
// DEBUG FLAG CHECKING FUNCTIONS
// =============================================================================

/// Webserver (HTTP routes, upgrades) debug mode
pub fn is_debug_webserver_enabled() -> bool {
    has_arg("--debug-webserver")
}

/// Broadcast hub debug mode
pub fn is_debug_hub_enabled() -> bool {
    has_arg("--debug-hub")
}

/// Per-connection lifecycle debug mode
pub fn is_debug_connection_enabled() -> bool {
    has_arg("--debug-connection")
}

/// Record store debug mode
pub fn is_debug_store_enabled() -> bool {
    has_arg("--debug-store")
}

/// Persistence queue debug mode
pub fn is_debug_persist_enabled() -> bool {
    has_arg("--debug-persist")
}

/// Help requested via --help or -h
pub fn is_help_requested() -> bool {
    has_arg("--help") || has_arg("-h")
}

/// Optional file that receives a plain-text copy of every log line
pub fn log_file_path() -> Option<String> {
    get_arg_value("--log-file")
}

pub fn print_help() {
    println!("vitals-relay - real-time telemetry relay for pulse oximeter sensors");
    println!();
    println!("USAGE:");
    println!("    vitals-relay [FLAGS]");
    println!();
    println!("ENVIRONMENT:");
    println!("    DATABASE_URL                 SQLite store location (required)");
    println!("    HOST / PORT                  Listen address (default 0.0.0.0:10000)");
    println!("    RELAY_MAX_FRAME_BYTES        Largest accepted WebSocket message");
    println!("    RELAY_MAX_CONNECTIONS        Concurrent client cap");
    println!("    RELAY_CLIENT_QUEUE_SIZE      Outbound frames buffered per client");
    println!("    RELAY_WRITE_TIMEOUT_MS       Per-delivery/per-write timeout");
    println!("    RELAY_PERSIST_QUEUE_SIZE     Readings waiting for the store");
    println!("    RELAY_PERSIST_CONCURRENCY    Concurrent store inserts");
    println!("    RELAY_PERSIST_TIMEOUT_MS     Per-insert timeout");
    println!();
    println!("FLAGS:");
    println!("    --help, -h                   Show this help message");
    println!("    --log-file <path>            Mirror log output to a file");
    println!("    --quiet                      Only warnings and errors");
    println!("    --verbose                    Very detailed trace output");
    println!();
    println!("DEBUG FLAGS:");
    println!("    --debug-webserver            HTTP routes and upgrades");
    println!("    --debug-hub                  Ingest and fan-out passes");
    println!("    --debug-connection           Per-connection lifecycle");
    println!("    --debug-store                Record store operations");
    println!("    --debug-persist              Persistence queue");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_value_lookup() {
        let original = get_cmd_args();
        set_cmd_args(vec![
            "vitals-relay".to_string(),
            "--log-file".to_string(),
            "relay.log".to_string(),
            "--debug-hub".to_string(),
        ]);

        assert_eq!(log_file_path().as_deref(), Some("relay.log"));
        assert!(is_debug_hub_enabled());
        assert!(!is_debug_store_enabled());
        // Trailing flag without a value
        assert_eq!(get_arg_value("--debug-hub"), None);

        set_cmd_args(original);
    }
}
