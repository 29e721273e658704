use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Deployment environment, read from `ENVIRONMENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

impl Environment {
    pub fn current() -> Self {
        match env::var("ENVIRONMENT").as_deref() {
            Ok("prod") | Ok("production") => Environment::Prod,
            Ok("test") => Environment::Test,
            _ => Environment::Dev,
        }
    }

    pub fn is_prod(self) -> bool {
        self == Environment::Prod
    }
}

/// Read an environment variable.
///
/// In production every key is mandatory and defaults are ignored, so a
/// deployment never silently runs on development values.
pub fn get_env(key: &str, default: Option<&str>, environment: Environment) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if environment.is_prod() {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
pub fn get_env_parsed<T>(key: &str, default: T, environment: Environment) -> Result<T, AppError>
where
    T: std::str::FromStr + ToString,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, Some(&default.to_string()), environment)?;
    raw.trim().parse::<T>().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_uses_default_outside_prod() {
        let value = get_env("SERVICE_CORE_TEST_UNSET_KEY", Some("fallback"), Environment::Dev)
            .expect("default should apply");
        assert_eq!(value, "fallback");
    }

    #[test]
    fn missing_key_is_fatal_in_prod() {
        let result = get_env("SERVICE_CORE_TEST_UNSET_KEY", Some("fallback"), Environment::Prod);
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn parsed_default_round_trips() {
        let value: u64 =
            get_env_parsed("SERVICE_CORE_TEST_UNSET_NUMBER", 1000, Environment::Dev).unwrap();
        assert_eq!(value, 1000);
    }
}
