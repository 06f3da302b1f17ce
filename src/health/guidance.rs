//! Static fallback guidance for degraded dependencies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a caller can do while a dependency is down.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackGuidance {
    /// Alternative endpoint to use directly.
    pub endpoint: Option<String>,
    /// Credentials the alternative endpoint needs.
    pub required_credentials: Vec<String>,
    /// Where to read more.
    pub documentation: Option<String>,
    /// Free-form recovery estimate.
    pub estimated_recovery: Option<String>,
    /// Overrides the generated message.
    pub message: Option<String>,
}

/// Guidance entries by breaker name.
#[derive(Debug, Clone, Default)]
pub struct GuidanceTable {
    entries: BTreeMap<String, FallbackGuidance>,
}

impl GuidanceTable {
    pub fn new(entries: BTreeMap<String, FallbackGuidance>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&FallbackGuidance> {
        self.entries.get(name)
    }

    /// Human-readable message for a degraded dependency.
    pub fn message_for(&self, name: &str) -> String {
        match self.entries.get(name) {
            Some(FallbackGuidance {
                message: Some(message),
                ..
            }) => message.clone(),
            Some(FallbackGuidance {
                endpoint: Some(endpoint),
                ..
            }) => format!("{name} is degraded; use {endpoint} directly until it recovers"),
            _ => generic_message(name),
        }
    }
}

pub fn generic_message(name: &str) -> String {
    format!("{name} is temporarily unavailable; retry later or continue with reduced functionality")
}
