use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("must set {0}")]
    Missing(&'static str),
    #[error("PORT must be an integer between 1 and 65535, got '{0}'")]
    BadPort(String),
    #[error("unknown TIER '{0}' (expected production, development or local)")]
    BadTier(String),
}

/// Deployment tier; decides cookie scoping and whether HTTPS is in front of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Production,
    Development,
    Local,
}

impl FromStr for Tier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Tier::Production),
            "development" | "dev" => Ok(Tier::Development),
            "local" => Ok(Tier::Local),
            other => Err(ConfigError::BadTier(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub tier: Tier,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Result<Self, ConfigError> {
        let tier = get("TIER").filter(|s| !s.is_empty()).ok_or(ConfigError::Missing("TIER"))?;
        let tier = tier.parse::<Tier>()?;
        let port = get("PORT").filter(|s| !s.is_empty()).ok_or(ConfigError::Missing("PORT"))?;
        let port = match port.trim().parse::<u16>() {
            Ok(p) if p > 0 => p,
            _ => return Err(ConfigError::BadPort(port)),
        };
        Ok(Config { port, tier })
    }

    /// Cookie domain; `None` for local development.
    pub fn hostname(&self) -> Option<&'static str> {
        match self.tier {
            Tier::Production => Some("app.teamxiv.space"),
            Tier::Development => Some("dev.teamxiv.space"),
            Tier::Local => None,
        }
    }

    /// True when a TLS-terminating proxy fronts the API.
    pub fn use_https(&self) -> bool { self.tier != Tier::Local }
}
