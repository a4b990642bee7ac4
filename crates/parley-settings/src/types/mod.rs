//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so that a settings file only needs the keys it changes.

mod orchestrator;

pub use orchestrator::*;

use std::path::PathBuf;

use parley_core::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Product brief given to the customer persona when none is configured.
pub const DEFAULT_PRODUCT_BRIEF: &str = "\
Goal: single-product landing page + checkout flow.
MVP features:
- Landing page: benefits, FAQ, reviews (mock), price
- Checkout: shipping info + payment (can be Stripe test)
- Order confirmation page + email receipt (can be mocked)
Constraints:
- Must be mobile-first and fast
Non-goals:
- Full catalog, user accounts (later)
";

/// Root settings.
///
/// ```json
/// {
///   "orchestrator": { "maxTurns": 5 },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Turn-taking and runtime limits.
    pub orchestrator: OrchestratorSettings,
    /// Checkpoint storage.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Conversation content.
    pub conversation: ConversationSettings,
}

impl ParleySettings {
    /// Reject combinations no orchestrator could be built from.
    pub fn validate(&self) -> Result<()> {
        let o = &self.orchestrator;
        if o.queue.len() < o.max_turns as usize {
            return Err(SettingsError::InvalidValue(format!(
                "orchestrator.maxTurns ({}) exceeds queue length ({})",
                o.max_turns,
                o.queue.len()
            )));
        }
        if o.registry_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "orchestrator.registryCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Checkpoint storage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// `SQLite` file. `None` means `~/.parley/parley.db`.
    pub db_path: Option<String>,
}

impl StoreSettings {
    /// Effective database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(p) => PathBuf::from(p),
            None => crate::loader::parley_dir().join("parley.db"),
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Conversation content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationSettings {
    /// Brief embedded in the customer persona.
    pub product_brief: String,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            product_brief: DEFAULT_PRODUCT_BRIEF.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ParleySettings::default().validate().is_ok());
    }

    #[test]
    fn too_many_turns_is_invalid() {
        let mut s = ParleySettings::default();
        s.orchestrator.max_turns = 16;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let mut s = ParleySettings::default();
        s.orchestrator.registry_capacity = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ParleySettings::default()).unwrap();
        assert_eq!(json["orchestrator"]["maxTurns"], 6);
        assert_eq!(json["orchestrator"]["agentTimeoutMs"], 120_000);
        assert_eq!(json["logging"]["format"], "compact");
        assert!(json["conversation"]["productBrief"]
            .as_str()
            .unwrap()
            .starts_with("Goal:"));
    }

    #[test]
    fn explicit_db_path_wins() {
        let s = StoreSettings {
            db_path: Some("/tmp/x.db".into()),
        };
        assert_eq!(s.resolved_db_path(), PathBuf::from("/tmp/x.db"));
        assert!(StoreSettings::default()
            .resolved_db_path()
            .ends_with(".parley/parley.db"));
    }
}
