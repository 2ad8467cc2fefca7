use llami_core::gate::ReconnectPolicy;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which robot controller drives the arm.
#[derive(Clone, Debug, PartialEq)]
pub enum RobotBackend {
    /// A dummy arm that never moves.
    Simulated { time_scale: f64 },
    /// An external program invoked once per execution. Runs overrunning
    /// their control duration by more than `grace` are killed.
    Process { command: String, grace: Duration },
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub policies_path: PathBuf,
    pub completion_url: String,
    pub completion_n_predict: u32,
    pub completion_timeout: Duration,
    pub gate_queue_depth: usize,
    pub reconnect: ReconnectPolicy,
    pub robot_backend: RobotBackend,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", raw, e)))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address: SocketAddr = parse_var("BIND_ADDRESS", "0.0.0.0:3000")?;

        let policies_path = PathBuf::from(var_or("POLICIES_PATH", "./configs/trained_policies"));

        let completion_url = var_or("COMPLETION_URL", "http://localhost:8080");
        if !completion_url.starts_with("http://") && !completion_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "COMPLETION_URL".to_string(),
                format!("'{}' is not an http(s) URL", completion_url),
            ));
        }
        let completion_n_predict: u32 = parse_var("COMPLETION_N_PREDICT", "128")?;
        let timeout_secs: u64 = parse_var("COMPLETION_TIMEOUT_SECS", "10")?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "COMPLETION_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let gate_queue_depth: usize = parse_var("GATE_QUEUE_DEPTH", "8")?;
        if gate_queue_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "GATE_QUEUE_DEPTH".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let reconnect = if parse_var::<bool>("RECONNECT_ON_FAILURE", "false")? {
            ReconnectPolicy::ReconnectOnFailure
        } else {
            ReconnectPolicy::KeepConnection
        };

        let robot_backend = match var_or("ROBOT_BACKEND", "simulated").to_lowercase().as_str() {
            "simulated" => {
                let time_scale: f64 = parse_var("SIMULATED_TIME_SCALE", "1.0")?;
                if !time_scale.is_finite() || time_scale < 0.0 {
                    return Err(ConfigError::InvalidValue(
                        "SIMULATED_TIME_SCALE".to_string(),
                        format!("'{}' must be a non-negative number", time_scale),
                    ));
                }
                RobotBackend::Simulated { time_scale }
            }
            "process" => {
                let command = std::env::var("ROBOT_COMMAND")
                    .ok()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        ConfigError::MissingVar(
                            "ROBOT_COMMAND must be set for 'process' backend".to_string(),
                        )
                    })?;
                let grace_secs: u64 = parse_var("ROBOT_GRACE_SECS", "10")?;
                RobotBackend::Process {
                    command,
                    grace: Duration::from_secs(grace_secs),
                }
            }
            other => {
                return Err(ConfigError::InvalidValue(
                    "ROBOT_BACKEND".to_string(),
                    format!("'{}' is not one of 'simulated', 'process'", other),
                ));
            }
        };

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            policies_path,
            completion_url,
            completion_n_predict,
            completion_timeout: Duration::from_secs(timeout_secs),
            gate_queue_depth,
            reconnect,
            robot_backend,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            for var in [
                "BIND_ADDRESS",
                "POLICIES_PATH",
                "COMPLETION_URL",
                "COMPLETION_N_PREDICT",
                "COMPLETION_TIMEOUT_SECS",
                "GATE_QUEUE_DEPTH",
                "RECONNECT_ON_FAILURE",
                "ROBOT_BACKEND",
                "ROBOT_COMMAND",
                "ROBOT_GRACE_SECS",
                "SIMULATED_TIME_SCALE",
                "RUST_LOG",
            ] {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env_vars();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.policies_path, PathBuf::from("./configs/trained_policies"));
        assert_eq!(config.completion_url, "http://localhost:8080");
        assert_eq!(config.completion_n_predict, 128);
        assert_eq!(config.completion_timeout, Duration::from_secs(10));
        assert_eq!(config.gate_queue_depth, 8);
        assert_eq!(config.reconnect, ReconnectPolicy::KeepConnection);
        assert_eq!(config.robot_backend, RobotBackend::Simulated { time_scale: 1.0 });
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8000");
            env::set_var("POLICIES_PATH", "/etc/llami/policies");
            env::set_var("COMPLETION_URL", "http://jetson.local:8080");
            env::set_var("COMPLETION_N_PREDICT", "64");
            env::set_var("COMPLETION_TIMEOUT_SECS", "3");
            env::set_var("GATE_QUEUE_DEPTH", "2");
            env::set_var("RECONNECT_ON_FAILURE", "true");
            env::set_var("ROBOT_BACKEND", "process");
            env::set_var("ROBOT_COMMAND", "python -m runner");
            env::set_var("ROBOT_GRACE_SECS", "4");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8000");
        assert_eq!(config.policies_path, PathBuf::from("/etc/llami/policies"));
        assert_eq!(config.completion_url, "http://jetson.local:8080");
        assert_eq!(config.completion_n_predict, 64);
        assert_eq!(config.completion_timeout, Duration::from_secs(3));
        assert_eq!(config.gate_queue_depth, 2);
        assert_eq!(config.reconnect, ReconnectPolicy::ReconnectOnFailure);
        assert_eq!(
            config.robot_backend,
            RobotBackend::Process {
                command: "python -m runner".to_string(),
                grace: Duration::from_secs(4),
            }
        );
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_zero_queue_depth_rejected() {
        clear_env_vars();
        unsafe {
            env::set_var("GATE_QUEUE_DEPTH", "0");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "GATE_QUEUE_DEPTH"),
            _ => panic!("Expected InvalidValue for GATE_QUEUE_DEPTH"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_completion_url() {
        clear_env_vars();
        unsafe {
            env::set_var("COMPLETION_URL", "localhost:8080");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "COMPLETION_URL"),
            _ => panic!("Expected InvalidValue for COMPLETION_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_process_backend_requires_command() {
        clear_env_vars();
        unsafe {
            env::set_var("ROBOT_BACKEND", "process");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("ROBOT_COMMAND")),
            _ => panic!("Expected MissingVar for ROBOT_COMMAND"),
        }
    }

    #[test]
    #[serial]
    fn test_config_unknown_backend() {
        clear_env_vars();
        unsafe {
            env::set_var("ROBOT_BACKEND", "hydraulic");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, msg) => {
                assert_eq!(var, "ROBOT_BACKEND");
                assert!(msg.contains("hydraulic"));
            }
            _ => panic!("Expected InvalidValue for ROBOT_BACKEND"),
        }
    }
}
