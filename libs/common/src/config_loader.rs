//! Configuration value resolution
//! Picks a setting from the command line, the environment or the config file

use tracing::debug;

/// Get string configuration value with priority: CLI > ENV > Default.
/// Empty strings count as unset.
pub fn get_string_config(cli_value: Option<String>, env_var: &str, default: String) -> String {
    if let Some(val) = cli_value {
        if !val.is_empty() {
            debug!("Using {} from command line", env_var);
            return val;
        }
    }

    if let Ok(env_val) = std::env::var(env_var) {
        if !env_val.is_empty() {
            debug!("Using {} from environment", env_var);
            return env_val;
        }
    }

    debug!("Using default value for {}", env_var);
    default
}
