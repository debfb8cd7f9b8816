//! Cache configuration.
//!
//! Hosts usually keep this next to the rest of their settings; it
//! deserializes from JSON with every field optional.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{MaxAge, NeverStale, StalenessPolicy};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Serve a settled entry for at most this long before refetching.
    /// Absent means entries never go stale on their own.
    pub max_age_ms: Option<u64>,
}

impl CacheConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_ms.map(Duration::from_millis)
    }

    pub fn staleness_policy(&self) -> Box<dyn StalenessPolicy> {
        match self.max_age() {
            Some(age) => Box::new(MaxAge(age)),
            None => Box::new(NeverStale),
        }
    }
}
