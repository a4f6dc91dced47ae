//! Named rate limit policies.
//!
//! A registry owns one independent [`RateLimiter`] per policy name, so
//! differently configured limits (e.g. per endpoint or per feature) can live
//! side by side without sharing history.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::limiter::RateLimiter;
use crate::config::PolicyConfig;
use crate::error::{Result, SlidegateError};

/// A set of isolated rate limiters keyed by policy name.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from policy configuration.
    ///
    /// Fails on the first policy with an invalid window or capacity.
    pub fn from_config(policies: &HashMap<String, PolicyConfig>) -> Result<Self> {
        let registry = Self::new();
        for (name, policy) in policies {
            let limiter = RateLimiter::from_secs(policy.window_size_secs, policy.max_requests)
                .map_err(|e| SlidegateError::Config(format!("policy '{}': {}", name, e)))?;
            registry.register(name.clone(), limiter);
        }
        Ok(registry)
    }

    /// Register a limiter under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, limiter: RateLimiter) -> Arc<RateLimiter> {
        let name = name.into();
        let limiter = Arc::new(limiter);
        info!(
            policy = %name,
            window_secs = limiter.window_size().as_secs_f64(),
            max_requests = limiter.max_requests(),
            "Registered rate limit policy"
        );
        self.policies.write().insert(name, Arc::clone(&limiter));
        limiter
    }

    /// Get the limiter for `name`, if registered.
    pub fn get(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.policies.read().get(name).cloned()
    }

    /// Get the limiter for `name`.
    pub fn limiter(&self, name: &str) -> Result<Arc<RateLimiter>> {
        self.get(name)
            .ok_or_else(|| SlidegateError::UnknownPolicy(name.to_string()))
    }

    /// Registered policy names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    /// Whether no policies are registered.
    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }
}
