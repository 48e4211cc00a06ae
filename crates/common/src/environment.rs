//! Coinbase feed endpoint selection.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Selects the environment: `production` (default) or `sandbox`.
pub const ENVIRONMENT_VAR: &str = "COINBASE_ENVIRONMENT";

/// Full feed URL; takes precedence over the environment.
pub const FEED_URL_VAR: &str = "COINBASE_FEED_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoinbaseEnvironment {
    #[default]
    Production,
    Sandbox,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown Coinbase environment '{0}', expected 'production' or 'sandbox'")]
pub struct ParseEnvironmentError(String);

impl CoinbaseEnvironment {
    /// Public market data websocket feed.
    pub fn ws_feed_url(&self) -> &'static str {
        match self {
            Self::Production => "wss://ws-feed.exchange.coinbase.com",
            Self::Sandbox => "wss://ws-feed-public.sandbox.exchange.coinbase.com",
        }
    }

    /// Reads [`ENVIRONMENT_VAR`]; unset means production.
    pub fn from_env() -> Result<Self, ParseEnvironmentError> {
        match std::env::var(ENVIRONMENT_VAR) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::default()),
        }
    }
}

impl fmt::Display for CoinbaseEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Production => "production",
            Self::Sandbox => "sandbox",
        })
    }
}

impl FromStr for CoinbaseEnvironment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.eq_ignore_ascii_case("production") {
            Ok(Self::Production)
        } else if name.eq_ignore_ascii_case("sandbox") {
            Ok(Self::Sandbox)
        } else {
            Err(ParseEnvironmentError(s.to_string()))
        }
    }
}

/// Feed URL from [`FEED_URL_VAR`], else the public feed of [`ENVIRONMENT_VAR`].
pub fn feed_url_from_env() -> Result<String, ParseEnvironmentError> {
    resolve_feed_url(
        std::env::var(FEED_URL_VAR).ok(),
        std::env::var(ENVIRONMENT_VAR).ok(),
    )
}

fn resolve_feed_url(
    url: Option<String>,
    environment: Option<String>,
) -> Result<String, ParseEnvironmentError> {
    if let Some(url) = url.filter(|url| !url.trim().is_empty()) {
        return Ok(url);
    }
    let environment = match environment {
        Some(name) => name.parse()?,
        None => CoinbaseEnvironment::default(),
    };
    Ok(environment.ws_feed_url().to_string())
}
