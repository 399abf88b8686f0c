//! Environment access for the bus address rewrite.

use std::collections::HashMap;

use super::error::EnvError;

/// Read/write access to environment variables.
pub trait Environment {
    /// Current value of `key`, if set and valid UTF-8.
    fn get(&self, key: &str) -> Option<String>;

    /// Set `key` to `value`, overwriting any previous value.
    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvError>;
}

fn check_pair(key: &str, value: &str) -> Result<(), EnvError> {
    if key.is_empty() || key.contains('=') || key.contains('\0') || value.contains('\0') {
        return Err(EnvError::Invalid {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// The real process environment.
///
/// Writing requires that no other thread reads the environment concurrently;
/// mediation runs single-threaded during sandbox start.
#[derive(Debug, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvError> {
        check_pair(key, value)?;
        // SAFETY: mediation is single-threaded; no concurrent env access.
        unsafe { std::env::set_var(key, value) };
        Ok(())
    }
}

/// In-memory environment, for dry runs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    /// Empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment with one variable preset.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

impl Environment for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvError> {
        check_pair(key, value)?;
        self.vars.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
