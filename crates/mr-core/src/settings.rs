use serde::{Deserialize, Serialize};

use crate::error::MacroError;
use crate::types::{Culture, Identity};

pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 9;
pub const DEFAULT_EVALUATION_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_CULTURE: &str = "en-US";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverSettings {
    pub culture: Culture,
    pub check_security: bool,
    pub max_recursion_depth: usize,
    pub evaluation_timeout_ms: u64,
    pub keep_unresolved: bool,
    pub encode_resolved_values: bool,
    pub avoid_sql_injection: bool,
    pub track_cache_dependencies: bool,
    pub virtual_mode: bool,
    pub user_name: Option<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            culture: Culture::new(DEFAULT_CULTURE),
            check_security: false,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            evaluation_timeout_ms: DEFAULT_EVALUATION_TIMEOUT_MS,
            keep_unresolved: false,
            encode_resolved_values: false,
            avoid_sql_injection: false,
            track_cache_dependencies: false,
            virtual_mode: false,
            user_name: None,
        }
    }
}

impl ResolverSettings {
    pub fn from_json(source: &str) -> Result<Self, MacroError> {
        let settings: Self = serde_json::from_str(source)
            .map_err(|error| MacroError::config(format!("Invalid resolver settings: {}", error)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), MacroError> {
        if self.max_recursion_depth == 0 {
            return Err(MacroError::config("maxRecursionDepth must be at least 1."));
        }
        if self.evaluation_timeout_ms == 0 {
            return Err(MacroError::config("evaluationTimeoutMs must be positive."));
        }
        if self.culture.code().is_empty() {
            return Err(MacroError::config(
                "culture must not be empty; use an explicit culture code.",
            ));
        }
        Ok(())
    }

    pub fn identity(&self) -> Identity {
        match &self.user_name {
            Some(name) => Identity::user(name.clone()),
            None => Identity::public(),
        }
    }
}

#[cfg(test)]
mod settings_tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let settings = ResolverSettings::default();
        assert_eq!(settings.max_recursion_depth, 9);
        assert_eq!(settings.evaluation_timeout_ms, 1000);
        assert!(!settings.keep_unresolved);
        assert_eq!(settings.culture.code(), "en-US");
        assert!(settings.identity().is_public);
    }

    #[test]
    fn json_fields_are_optional_and_camel_case() {
        let settings =
            ResolverSettings::from_json(r#"{"keepUnresolved": true, "culture": "cs-CZ"}"#)
                .expect("settings should parse");
        assert!(settings.keep_unresolved);
        assert_eq!(settings.culture.code(), "cs-CZ");
        assert_eq!(settings.max_recursion_depth, DEFAULT_MAX_RECURSION_DEPTH);
    }

    #[test]
    fn validation_rejects_zero_limits() {
        let error = ResolverSettings::from_json(r#"{"maxRecursionDepth": 0}"#)
            .expect_err("zero depth should fail");
        assert_eq!(error.code, "MACRO_CONFIG");
        let error = ResolverSettings::from_json(r#"{"evaluationTimeoutMs": 0}"#)
            .expect_err("zero timeout should fail");
        assert_eq!(error.code, "MACRO_CONFIG");
    }
}
