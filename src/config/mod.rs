/**
 * Initialize tool configuration, using hierarchical configuration
 * https://docs.rs/config/latest/config/
 *
 * 1. First turnpike.yaml is read
 * 2. Then turnpike.local.yaml is read (this is normally used for dev and not checked in git)
 * 3. Finally, environment variables are read
 *
 * Command line flags override the timeout where both are given.
 */
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

mod loglevel_type;

/**
 * Represents the configuration settings for the turnpike CLI.
 *
 * Fields:
 * - `log_level`: The logging level. Overridden to debug by the --debug flag.
 * - `timeout`: Default per-call I/O deadline in seconds.
 * - `refresh_interval`: Seconds between TURN Refresh requests on an active
 *   SOCKS tunnel. coturn's default allocation lifetime is 600 seconds, so
 *   the default of 300 leaves a safe margin.
 * - `socks_listen`: Default listen address for the socks subcommand.
 */
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(deserialize_with = "loglevel_type::deserialize")]
    pub log_level: slog::Level,
    pub timeout: u64,
    pub refresh_interval: u64,
    pub socks_listen: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            // default config file
            .add_source(File::with_name("turnpike.yaml").required(false))
            // local config file (don't check this into source control)
            .add_source(File::with_name("turnpike.local.yaml").required(false))
            .add_source(Environment::with_prefix("TURNPIKE"))
            .set_default("log_level", "info")?
            .set_default("timeout", 1_i64)?
            .set_default("refresh_interval", 300_i64)?
            .set_default("socks_listen", "127.0.0.1:1080")?
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use std::env;

    use super::*;

    fn reset_env_var() {
        let v = env::vars().collect::<Vec<(String, String)>>();
        for (name, _) in v {
            if name.starts_with("TURNPIKE_") {
                env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        reset_env_var();
        let settings = Settings::new().expect("Deserialization failed");
        assert_eq!(settings.log_level, slog::Level::Info);
        assert_eq!(settings.timeout, 1);
        assert_eq!(settings.refresh_interval, 300);
        assert_eq!(settings.socks_listen, "127.0.0.1:1080");
        reset_env_var();
    }

    #[test]
    #[serial]
    fn test_timeout_variable() {
        reset_env_var();
        env::set_var("TURNPIKE_TIMEOUT", "5");
        let settings = Settings::new().expect("Deserialization failed");
        assert_eq!(settings.timeout, 5);
        reset_env_var();
    }

    #[test]
    #[serial]
    fn test_log_level_variable() {
        reset_env_var();
        env::set_var("TURNPIKE_LOG_LEVEL", "trace");
        let settings = Settings::new().expect("Deserialization failed");
        assert_eq!(settings.log_level, slog::Level::Trace);

        env::set_var("TURNPIKE_LOG_LEVEL", "Debug");
        let settings = Settings::new().expect("Deserialization failed");
        assert_eq!(settings.log_level, slog::Level::Debug);
        reset_env_var();
    }

    #[test]
    #[serial]
    fn test_socks_listen_variable() {
        reset_env_var();
        env::set_var("TURNPIKE_SOCKS_LISTEN", "0.0.0.0:9050");
        let settings = Settings::new().expect("Deserialization failed");
        assert_eq!(settings.socks_listen, "0.0.0.0:9050");
        reset_env_var();
    }
}
