//! Runtime settings from the environment (`.env` is loaded by the binaries).

use crate::error::ConfigError;
use regex::Regex;
use std::net::SocketAddr;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/classroom";
const DEFAULT_SCHEMA: &str = "classroom";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// PostgreSQL schema holding the collection tables. From `CLASSROOM_SCHEMA`.
    pub schema: String,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    /// Maximum accepted request body in bytes.
    pub body_limit: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; missing keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into());

        let schema = lookup("CLASSROOM_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.into());
        let ident = Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").map_err(|e| ConfigError::Invalid {
            key: "CLASSROOM_SCHEMA",
            value: schema.clone(),
            reason: e.to_string(),
        })?;
        if !ident.is_match(&schema) {
            return Err(ConfigError::Invalid {
                key: "CLASSROOM_SCHEMA",
                value: schema,
                reason: "expected a lowercase SQL identifier".into(),
            });
        }

        let bind_raw = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "BIND_ADDR",
            value: bind_raw.clone(),
            reason: "expected host:port".into(),
        })?;

        let max_connections = parse_or("DB_MAX_CONNECTIONS", lookup("DB_MAX_CONNECTIONS"), DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DB_MAX_CONNECTIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let body_limit = parse_or("REQUEST_BODY_LIMIT", lookup("REQUEST_BODY_LIMIT"), DEFAULT_BODY_LIMIT)?;

        Ok(Settings {
            database_url,
            schema,
            bind_addr,
            max_connections,
            body_limit,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: v.clone(),
            reason: "expected a positive integer".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(s.schema, "classroom");
        assert_eq!(s.bind_addr.port(), 3000);
        assert_eq!(s.max_connections, 5);
        assert_eq!(s.body_limit, 1024 * 1024);
    }

    #[test]
    fn rejects_schema_that_is_not_an_identifier() {
        let err = settings(&[("CLASSROOM_SCHEMA", "drop table;")]).unwrap_err();
        assert!(err.to_string().contains("CLASSROOM_SCHEMA"));
    }

    #[test]
    fn rejects_zero_connections() {
        assert!(settings(&[("DB_MAX_CONNECTIONS", "0")]).is_err());
        assert_eq!(settings(&[("DB_MAX_CONNECTIONS", "12")]).unwrap().max_connections, 12);
    }
}
