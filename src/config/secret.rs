// ABOUTME: Password and inline-key values for the auth section.
// ABOUTME: Written inline or as an env reference; Debug never prints the value.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;

/// A credential given either inline or as `{ env: VAR, default: ... }`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Secret {
    Inline(String),
    Env {
        env: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl Secret {
    pub fn inline(value: impl Into<String>) -> Self {
        Secret::Inline(value.into())
    }

    pub fn from_env(var: impl Into<String>) -> Self {
        Secret::Env {
            env: var.into(),
            default: None,
        }
    }

    /// The secret text. An unset variable without a default is an error
    /// naming the variable.
    pub fn reveal(&self) -> Result<String> {
        match self {
            Secret::Inline(value) => Ok(value.clone()),
            Secret::Env { env, default } => std::env::var(env)
                .ok()
                .or_else(|| default.clone())
                .ok_or_else(|| Error::MissingEnvVar(env.clone())),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Inline(_) => f.write_str("Secret(<redacted>)"),
            Secret::Env { env, default } => f
                .debug_struct("Secret")
                .field("env", env)
                .field("has_default", &default.is_some())
                .finish(),
        }
    }
}
