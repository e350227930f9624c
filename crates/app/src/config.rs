//! Application configuration.
//!
//! A flat store of dotted keys (`view.engine`, `static.path`) holding JSON
//! values. Values cascade: built-in defaults, then the environment, then
//! explicit `set` calls.

use std::collections::BTreeMap;

use serde_json::Value;

/// Port used when neither the caller nor the configuration names one.
pub const DEFAULT_PORT: u16 = 3000;

/// Environment name used when no environment variable selects one.
pub const DEFAULT_ENVIRONMENT: &str = "development";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration key `{0}` is not set")]
    Missing(String),

    #[error("configuration key `{key}` is invalid: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    values: BTreeMap<String, Value>,
}

impl Configuration {
    /// Empty configuration, no defaults applied.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in defaults for the given environment name.
    pub fn defaults(environment: impl Into<String>) -> Self {
        let mut config = Self::empty();
        config
            .set("env", environment.into())
            .set("port", DEFAULT_PORT)
            .set("static.path", "public")
            .set("view.path", "app/views")
            .set("view.engine", "ejs")
            .set("view.layout", false);
        config
    }

    /// Defaults overlaid with the process environment.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with variables resolved through `lookup`.
    ///
    /// `STRATUM_ENV` (or `APP_ENV`) selects the environment and `PORT`
    /// overrides the port. An unparsable `PORT` is kept as a string and
    /// reported by [`Configuration::port`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let environment = lookup("STRATUM_ENV")
            .or_else(|| lookup("APP_ENV"))
            .filter(|env| !env.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        let mut config = Self::defaults(environment);
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.set("port", port),
                Err(_) => config.set("port", port),
            };
        }
        config
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// All keys under a dotted prefix (`"view"` matches `view.path`, `view.engine`).
    pub fn section<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.values.iter().filter_map(move |(key, value)| {
            key.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|rest| (rest, value))
        })
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ConfigError> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(ConfigError::invalid(key, format!("expected a string, got {other}"))),
            None => Err(ConfigError::Missing(key.to_string())),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(ConfigError::invalid(key, format!("expected a boolean, got {other}"))),
            None => Err(ConfigError::Missing(key.to_string())),
        }
    }

    pub fn environment(&self) -> &str {
        self.get_str("env").unwrap_or(DEFAULT_ENVIRONMENT)
    }

    /// Configured port, if any. Accepts a number or a numeric string.
    pub fn port(&self) -> Result<Option<u16>, ConfigError> {
        let parsed = match self.get("port") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
            Some(_) => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| ConfigError::invalid("port", "expected a port number in 0..=65535"))
    }
}
