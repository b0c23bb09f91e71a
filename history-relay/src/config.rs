//! Resolved relay settings.
//!
//! Every setting has a default, and an unusable value (unparsable, out of
//! range, empty) is replaced by that default with a warning rather than
//! rejected.

use std::{num::NonZeroUsize, str::FromStr};

use tracing::warn;

use crate::cli::ServeArgs;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 18800;
pub const DEFAULT_HISTORY: NonZeroUsize = NonZeroUsize::new(10).unwrap();
pub const DEFAULT_MAX_CONNECTIONS: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub address: String,
    pub port: u16,
    pub history_capacity: NonZeroUsize,
    pub max_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            history_capacity: DEFAULT_HISTORY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl RelayConfig {
    pub fn from_args(args: &ServeArgs) -> Self {
        let address = match args.address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => address.to_string(),
            _ => DEFAULT_ADDRESS.to_string(),
        };

        let port = resolve("port", args.port.as_deref(), DEFAULT_PORT, |port: &u16| {
            *port > 0
        });
        let history_capacity = resolve(
            "history",
            args.history.as_deref(),
            DEFAULT_HISTORY,
            |_: &NonZeroUsize| true,
        );
        let max_connections = resolve(
            "max-connections",
            args.max_connections.as_deref(),
            DEFAULT_MAX_CONNECTIONS,
            |limit: &usize| *limit > 0,
        );

        Self {
            address,
            port,
            history_capacity,
            max_connections,
        }
    }
}

fn resolve<T, F>(name: &str, raw: Option<&str>, default: T, valid: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&T) -> bool,
{
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return default;
    };

    match raw.parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            warn!(setting = name, value = raw, %default, "invalid setting, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(port: Option<&str>, history: Option<&str>) -> ServeArgs {
        ServeArgs {
            port: port.map(Into::into),
            history: history.map(Into::into),
            ..ServeArgs::default()
        }
    }

    #[test]
    fn missing_settings_use_defaults() {
        assert_eq!(RelayConfig::from_args(&ServeArgs::default()), RelayConfig::default());
    }

    #[test]
    fn valid_settings_are_kept() {
        let config = RelayConfig::from_args(&ServeArgs {
            address: Some("0.0.0.0".into()),
            port: Some("9000".into()),
            history: Some("3".into()),
            max_connections: Some("2".into()),
        });

        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.history_capacity.get(), 3);
        assert_eq!(config.max_connections, 2);
    }

    #[test]
    fn out_of_range_ports_fall_back() {
        for raw in ["0", "-1", "65536", "http"] {
            assert_eq!(
                RelayConfig::from_args(&args(Some(raw), None)).port,
                DEFAULT_PORT,
                "port {raw}"
            );
        }
    }

    #[test]
    fn non_positive_history_falls_back() {
        for raw in ["0", "-4", "lots"] {
            assert_eq!(
                RelayConfig::from_args(&args(None, Some(raw))).history_capacity,
                DEFAULT_HISTORY,
                "history {raw}"
            );
        }
    }

    #[test]
    fn blank_address_falls_back() {
        let config = RelayConfig::from_args(&ServeArgs {
            address: Some("  ".into()),
            ..ServeArgs::default()
        });
        assert_eq!(config.address, DEFAULT_ADDRESS);
    }
}
