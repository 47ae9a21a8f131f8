//! Controller configuration.
//!
//! Configuration is read once from environment variables at startup into an
//! immutable `ScalerConfig`, which is then shared by reference with the
//! reconciliation loop and the scaling engine.

use crate::error::ControllerError;
use crate::quantity;
use std::time::Duration;

/// Port the readiness endpoint listens on
pub const PORT_ENV: &str = "PORT";
/// Label selector for the nodes this controller manages
pub const NODE_SELECTOR_ENV: &str = "NODE_SELECTOR";
/// CPU request of a single game server (e.g. `0.5` or `500m`)
pub const CPU_REQUEST_ENV: &str = "CPU_REQUEST";
/// How many game servers worth of free capacity to keep
pub const BUFFER_COUNT_ENV: &str = "BUFFER_COUNT";
/// Time between reconciliation ticks
pub const TICK_ENV: &str = "TICK";
/// How long after a node is cordoned it may be deleted (once it is empty)
pub const SHUTDOWN_NODE_ENV: &str = "SHUTDOWN_NODE";
/// Minimum number of nodes in the pool
pub const MIN_NODE_ENV: &str = "MIN_NODE";
/// Maximum number of nodes in the pool
pub const MAX_NODE_ENV: &str = "MAX_NODE";
/// GKE node pool name, overriding the label of the first managed node
pub const NODE_POOL_ENV: &str = "NODE_POOL";
/// Label selector identifying game-session pods
pub const GAME_SELECTOR_ENV: &str = "GAME_SELECTOR";

/// Label selector of game-session pods unless overridden
pub const DEFAULT_GAME_SELECTOR: &str = "sessions=game";

/// Immutable scaler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalerConfig {
    pub port: u16,
    /// Label selector for managed nodes
    pub node_selector: String,
    /// CPU request per game server, in milli-CPU
    pub cpu_request: i64,
    /// Number of game-server slots to keep free
    pub buffer_count: i64,
    pub tick: Duration,
    /// Cordon-to-delete grace period
    pub shutdown: Duration,
    /// Minimum node count, 0 when unset
    pub min_nodes: i64,
    pub max_nodes: Option<i64>,
    pub node_pool: Option<String>,
    pub game_selector: String,
}

impl ScalerConfig {
    /// Creates a configuration with the default buffer, tick and shutdown values.
    pub fn new(node_selector: impl Into<String>, cpu_request: &str) -> Result<Self, ControllerError> {
        let cpu_request = quantity::parse_milli(cpu_request).map_err(|e| {
            ControllerError::InvalidConfig(format!("Could not parse cpu resource request: {}", e))
        })?;

        let config = Self {
            port: 8080,
            node_selector: node_selector.into(),
            cpu_request,
            buffer_count: 5,
            tick: Duration::from_secs(10),
            shutdown: Duration::from_secs(60),
            min_nodes: 0,
            max_nodes: None,
            node_pool: None,
            game_selector: DEFAULT_GAME_SELECTOR.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary variable lookup.
    ///
    /// Unset and empty variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let node_selector = get(NODE_SELECTOR_ENV).ok_or_else(|| {
            ControllerError::InvalidConfig(format!("{} environment variable is required", NODE_SELECTOR_ENV))
        })?;
        let cpu_request = get(CPU_REQUEST_ENV).ok_or_else(|| {
            ControllerError::InvalidConfig(format!("{} environment variable is required", CPU_REQUEST_ENV))
        })?;

        let mut config = Self::new(node_selector, &cpu_request)?;

        if let Some(port) = get(PORT_ENV) {
            config.port = parse_env(PORT_ENV, &port)?;
        }
        if let Some(bc) = get(BUFFER_COUNT_ENV) {
            config.buffer_count = parse_env(BUFFER_COUNT_ENV, &bc)?;
        }
        if let Some(tick) = get(TICK_ENV) {
            config.tick = parse_duration(&tick).map_err(|e| {
                ControllerError::InvalidConfig(format!("Error parsing {} value of {}, {}", TICK_ENV, tick, e))
            })?;
        }
        if let Some(sd) = get(SHUTDOWN_NODE_ENV) {
            config.shutdown = parse_duration(&sd).map_err(|e| {
                ControllerError::InvalidConfig(format!("Error decoding {} value of {}, {}", SHUTDOWN_NODE_ENV, sd, e))
            })?;
        }
        if let Some(min) = get(MIN_NODE_ENV) {
            config.min_nodes = parse_env(MIN_NODE_ENV, &min)?;
        }
        if let Some(max) = get(MAX_NODE_ENV) {
            config.max_nodes = Some(parse_env(MAX_NODE_ENV, &max)?);
        }
        config.node_pool = get(NODE_POOL_ENV);
        if let Some(selector) = get(GAME_SELECTOR_ENV) {
            config.game_selector = selector;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the scaling engine relies on.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.node_selector.trim().is_empty() {
            return Err(ControllerError::InvalidConfig("node selector must not be empty".to_string()));
        }
        if self.cpu_request <= 0 {
            return Err(ControllerError::InvalidConfig(format!(
                "cpu request must be positive, got {}m",
                self.cpu_request
            )));
        }
        if self.buffer_count < 0 {
            return Err(ControllerError::InvalidConfig(format!(
                "buffer count must not be negative, got {}",
                self.buffer_count
            )));
        }
        if self.tick.is_zero() {
            return Err(ControllerError::InvalidConfig("tick must be greater than zero".to_string()));
        }
        if self.min_nodes < 0 {
            return Err(ControllerError::InvalidConfig(format!(
                "minimum node count must not be negative, got {}",
                self.min_nodes
            )));
        }
        if let Some(max) = self.max_nodes {
            if max < 0 {
                return Err(ControllerError::InvalidConfig(format!(
                    "maximum node count must not be negative, got {}",
                    max
                )));
            }
            if self.min_nodes > max {
                return Err(ControllerError::InvalidConfig(format!(
                    "minimum node count {} is larger than maximum node count {}",
                    self.min_nodes, max
                )));
            }
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ControllerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        ControllerError::InvalidConfig(format!("Error decoding {} value of {}, {}", key, value, e))
    })
}

/// Parses a Go-style duration such as `10s`, `1m30s`, `1.5h` or `250ms`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {:?}", input))?;
        if number_len == 0 {
            return Err(format!("invalid duration {:?}", input));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
        };
        rest = &rest[unit_len..];
        total_nanos += value * unit_nanos;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("duration {:?} out of range", input));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ScalerConfig::new("app=game-server", "0.5").unwrap();
        assert_eq!(config.node_selector, "app=game-server");
        assert_eq!(config.cpu_request, 500);
        assert_eq!(config.buffer_count, 5);
        assert_eq!(config.tick, Duration::from_secs(10));
        assert_eq!(config.shutdown, Duration::from_secs(60));
        assert_eq!(config.min_nodes, 0);
        assert_eq!(config.max_nodes, None);
        assert_eq!(config.game_selector, DEFAULT_GAME_SELECTOR);
    }

    #[test]
    fn test_from_lookup_all_values() {
        let config = ScalerConfig::from_lookup(lookup(&[
            (NODE_SELECTOR_ENV, "app=game-server"),
            (CPU_REQUEST_ENV, "250m"),
            (PORT_ENV, "9090"),
            (BUFFER_COUNT_ENV, "12"),
            (TICK_ENV, "30s"),
            (SHUTDOWN_NODE_ENV, "5m"),
            (MIN_NODE_ENV, "2"),
            (MAX_NODE_ENV, "10"),
            (NODE_POOL_ENV, "game-servers"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.cpu_request, 250);
        assert_eq!(config.buffer_count, 12);
        assert_eq!(config.tick, Duration::from_secs(30));
        assert_eq!(config.shutdown, Duration::from_secs(300));
        assert_eq!(config.min_nodes, 2);
        assert_eq!(config.max_nodes, Some(10));
        assert_eq!(config.node_pool.as_deref(), Some("game-servers"));
    }

    #[test]
    fn test_empty_values_use_defaults() {
        let config = ScalerConfig::from_lookup(lookup(&[
            (NODE_SELECTOR_ENV, "app=game-server"),
            (CPU_REQUEST_ENV, "0.5"),
            (BUFFER_COUNT_ENV, ""),
            (MAX_NODE_ENV, " "),
        ]))
        .unwrap();
        assert_eq!(config.buffer_count, 5);
        assert_eq!(config.max_nodes, None);
    }

    #[test]
    fn test_missing_required_values() {
        let result = ScalerConfig::from_lookup(lookup(&[(CPU_REQUEST_ENV, "0.5")]));
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));

        let result = ScalerConfig::from_lookup(lookup(&[(NODE_SELECTOR_ENV, "app=game-server")]));
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let base = [(NODE_SELECTOR_ENV, "app=game-server"), (CPU_REQUEST_ENV, "0.5")];
        for (key, value) in [
            (CPU_REQUEST_ENV, "half"),
            (CPU_REQUEST_ENV, "0"),
            (BUFFER_COUNT_ENV, "five"),
            (BUFFER_COUNT_ENV, "-1"),
            (TICK_ENV, "10"),
            (TICK_ENV, "0s"),
            (SHUTDOWN_NODE_ENV, "soon"),
            (MIN_NODE_ENV, "-2"),
        ] {
            let mut vars = base.to_vec();
            vars.retain(|(k, _)| *k != key);
            vars.push((key, value));
            let result = ScalerConfig::from_lookup(lookup(&vars));
            assert!(
                matches!(result, Err(ControllerError::InvalidConfig(_))),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_min_larger_than_max() {
        let result = ScalerConfig::from_lookup(lookup(&[
            (NODE_SELECTOR_ENV, "app=game-server"),
            (CPU_REQUEST_ENV, "0.5"),
            (MIN_NODE_ENV, "6"),
            (MAX_NODE_ENV, "5"),
        ]));
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5h"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("3d").is_err());
    }
}
