//! Configuration surface.
//!
//! One [`AppConfig`] is the single configuration surface for every
//! subsystem: `clap` (`Args`, derive) for CLI parsing, `ortho_config`
//! (`OrthoConfig`, derive) for config-file/environment layering, and
//! `figment` underneath both.

#![allow(missing_docs, reason = "OrthoConfig/Clap derive macros generate items that cannot be documented")]
#![allow(unfulfilled_lint_expectations, reason = "derive macros conditionally generate items")]

use clap::Args;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

/// Which parambus adapter and uplink transport a deployment runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayMode {
    /// A real parambus connection and uplink transport.
    Real,
    /// [`crate::parambus::mock::MockParambusAdapter`] and
    /// [`crate::uplink::MockTransport`] (line-delimited JSON over stdio).
    #[default]
    Mock,
}

/// Error returned when [`AppConfig::mode`]'s raw string is neither `"real"`
/// nor `"mock"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized mode {0:?}, expected \"real\" or \"mock\"")]
pub struct InvalidMode(pub String);

impl std::str::FromStr for GatewayMode {
    type Err = InvalidMode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "real" => Ok(Self::Real),
            "mock" => Ok(Self::Mock),
            other => Err(InvalidMode(other.to_owned())),
        }
    }
}

/// Runtime configuration shared by the binary and every library component.
#[derive(Args, OrthoConfig, Serialize, Deserialize, Debug, Clone)]
#[ortho_config(prefix = "PARAMGATE_")]
pub struct AppConfig {
    /// Parambus component name this gateway registers under.
    #[ortho_config(default = "parodus2rbus.client".to_owned())]
    #[arg(long, default_value_t = String::from("parodus2rbus.client"))]
    pub component: String,
    /// Service name this gateway registers under the uplink as.
    #[ortho_config(default = "config".to_owned())]
    #[arg(long, default_value_t = String::from("config"))]
    pub service_name: String,
    /// `"real"` or `"mock"`; parsed into a [`GatewayMode`] via
    /// [`AppConfig::mode`].
    #[ortho_config(default = "mock".to_owned())]
    #[arg(long, default_value_t = String::from("mock"))]
    pub mode: String,
    /// Verbosity, `0..=3`; the binary maps this to a `tracing`
    /// filter if a subscriber is installed.
    #[ortho_config(default = 1)]
    #[arg(long, default_value_t = 1)]
    pub log_level: u8,
    /// Destination every event-pipeline notification is addressed to.
    #[ortho_config(default = "events".to_owned())]
    #[arg(long, default_value_t = String::from("events"))]
    pub events_endpoint: String,
    /// Table-path prefix whose row lifecycle becomes client
    /// connect/disconnect notifications.
    #[ortho_config(default = "Device.Hosts.".to_owned())]
    #[arg(long, default_value_t = String::from("Device.Hosts."))]
    pub clients_table_prefix: String,

    /// Parameter cache: maximum live entries before eviction.
    #[ortho_config(default = 10_000)]
    #[arg(long, default_value_t = 10_000)]
    pub max_entries: usize,
    /// Parameter cache: default TTL, in seconds.
    #[ortho_config(default = 300)]
    #[arg(long, default_value_t = 300)]
    pub default_ttl_seconds: u64,
    /// Parameter cache: lazy `expire_sweep` cadence, in seconds.
    #[ortho_config(default = 60)]
    #[arg(long, default_value_t = 60)]
    pub cleanup_interval_seconds: u64,
    /// Whether cache hit/miss/eviction statistics are tracked for surfacing.
    #[ortho_config(default = true)]
    #[arg(long, default_value_t = true)]
    pub enable_stats: bool,

    /// Transaction engine: maximum parameters per transaction.
    #[ortho_config(default = 64)]
    #[arg(long, default_value_t = 64)]
    pub max_transaction_size: usize,
    /// Transaction engine: wall-clock budget for the apply phase, in
    /// seconds.
    #[ortho_config(default = 30)]
    #[arg(long, default_value_t = 30)]
    pub transaction_timeout_seconds: u64,
    /// Transaction engine: whether atomic transactions snapshot and roll
    /// back on failure.
    #[ortho_config(default = true)]
    #[arg(long, default_value_t = true)]
    pub enable_rollback: bool,
    /// Transaction engine: whether the validate step runs at all.
    #[ortho_config(default = true)]
    #[arg(long, default_value_t = true)]
    pub enable_validation: bool,

    /// Event pipeline: fill `oldValue` from the cache's last-known
    /// rendering rather than always reporting `"unknown"`.
    #[ortho_config(default = true)]
    #[arg(long, default_value_t = true)]
    pub notify_fill_old_value_from_cache: bool,
}

impl AppConfig {
    /// Parse [`Self::mode`] into a [`GatewayMode`].
    ///
    /// # Errors
    /// Returns [`InvalidMode`] if `mode` is neither `"real"` nor `"mock"`.
    pub fn mode(&self) -> Result<GatewayMode, InvalidMode> {
        self.mode.parse()
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_select_mock_mode() {
        Jail::expect_with(|_jail| {
            let cfg = AppConfig::load_from_iter(["paramgated"]).expect("load");
            assert_eq!(cfg.mode().expect("valid mode"), GatewayMode::Mock);
            assert_eq!(cfg.component, "parodus2rbus.client");
            Ok(())
        });
    }

    #[rstest]
    fn env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("PARAMGATE_MODE", "real");
            jail.set_env("PARAMGATE_MAX_ENTRIES", "256");
            let cfg = AppConfig::load_from_iter(["paramgated"]).expect("load");
            assert_eq!(cfg.mode().expect("valid mode"), GatewayMode::Real);
            assert_eq!(cfg.max_entries, 256);
            Ok(())
        });
    }

    #[rstest]
    fn cli_overrides_env() {
        Jail::expect_with(|jail| {
            jail.set_env("PARAMGATE_SERVICE_NAME", "from-env");
            let cfg = AppConfig::load_from_iter(["paramgated", "--service-name", "from-cli"]).expect("load");
            assert_eq!(cfg.service_name, "from-cli");
            Ok(())
        });
    }

    #[rstest]
    fn loads_from_dotfile() {
        Jail::expect_with(|jail| {
            jail.create_file(".paramgated.toml", "log_level = 3")?;
            let cfg = AppConfig::load_from_iter(["paramgated"]).expect("load");
            assert_eq!(cfg.log_level, 3);
            Ok(())
        });
    }

    #[test]
    fn invalid_mode_string_is_rejected() {
        let err = "not-a-mode".parse::<GatewayMode>().expect_err("must fail");
        assert_eq!(err, InvalidMode("not-a-mode".into()));
    }
}
