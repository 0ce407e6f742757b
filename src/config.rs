//! Runtime configuration read from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `FERROGROUP_LOCAL_THREADS` | rayon default | workers in a rank's local pool |
//! | `FERROGROUP_STRICT_SYNC` | `true` | broadcast and scatter wait for every rank to arrive before moving data |
//! | `FERROGROUP_HANDSHAKE` | `true` | verify at init that every rank sees the same group size |

use std::env;
use std::str::FromStr;

/// Environment variable for [`Config::local_threads`].
pub const ENV_LOCAL_THREADS: &str = "FERROGROUP_LOCAL_THREADS";
/// Environment variable for [`Config::strict_sync`].
pub const ENV_STRICT_SYNC: &str = "FERROGROUP_STRICT_SYNC";
/// Environment variable for [`Config::handshake`].
pub const ENV_HANDSHAKE: &str = "FERROGROUP_HANDSHAKE";

/// Group configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Worker threads for a rank's local dispatcher; `None` lets rayon decide.
    pub local_threads: Option<usize>,
    /// Fan every rank in to root before broadcast/scatter data moves.
    pub strict_sync: bool,
    /// Run the group-size agreement during init.
    pub handshake: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            local_threads: None,
            strict_sync: true,
            handshake: true,
        }
    }
}

impl Config {
    /// Defaults overridden by any variables present in the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        Config {
            local_threads: parse(&lookup, ENV_LOCAL_THREADS)
                .filter(|&n: &usize| n > 0)
                .or(defaults.local_threads),
            strict_sync: parse_flag(&lookup, ENV_STRICT_SYNC).unwrap_or(defaults.strict_sync),
            handshake: parse_flag(&lookup, ENV_HANDSHAKE).unwrap_or(defaults.handshake),
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("ignoring {key}={raw:?}: expected a boolean");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
    }

    #[test]
    fn values_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            (ENV_LOCAL_THREADS, "3"),
            (ENV_STRICT_SYNC, "off"),
            (ENV_HANDSHAKE, "0"),
        ]));
        assert_eq!(config.local_threads, Some(3));
        assert!(!config.strict_sync);
        assert!(!config.handshake);
    }

    #[test]
    fn bad_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            (ENV_LOCAL_THREADS, "many"),
            (ENV_STRICT_SYNC, "maybe"),
        ]));
        assert_eq!(config, Config::default());

        let zero = Config::from_lookup(lookup(&[(ENV_LOCAL_THREADS, "0")]));
        assert_eq!(zero.local_threads, None);
    }
}
