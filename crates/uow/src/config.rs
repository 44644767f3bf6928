//! Mapper configuration.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::identity_map::FieldIdentityStrategy;

/// Environment variable holding the default identifier fields (comma separated).
pub const IDENTIFIER_FIELDS_ENV: &str = "SKELMAP_IDENTIFIER_FIELDS";

/// Environment variable holding per-class identifier fields (`User=id;Membership=user_id,group_id`).
pub const CLASS_IDENTIFIERS_ENV: &str = "SKELMAP_CLASS_IDENTIFIERS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("empty identifier field list")]
    EmptyFields,

    #[error("malformed class identifier entry: {0}")]
    MalformedEntry(String),
}

/// How natural keys are derived from loaded data.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Identifier fields used for classes without an override.
    pub identifier_fields: Vec<String>,
    /// Per-class identifier fields.
    pub class_identifier_fields: HashMap<String, Vec<String>>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            identifier_fields: vec!["id".to_string()],
            class_identifier_fields: HashMap::new(),
        }
    }
}

impl MapperConfig {
    /// Defaults overridden by `SKELMAP_IDENTIFIER_FIELDS` / `SKELMAP_CLASS_IDENTIFIERS`.
    ///
    /// Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(IDENTIFIER_FIELDS_ENV) {
            match parse_field_list(&raw) {
                Ok(fields) => config.identifier_fields = fields,
                Err(e) => warn!(var = IDENTIFIER_FIELDS_ENV, error = %e, "ignoring identifier fields"),
            }
        }

        if let Ok(raw) = std::env::var(CLASS_IDENTIFIERS_ENV) {
            match parse_class_identifiers(&raw) {
                Ok(overrides) => config.class_identifier_fields.extend(overrides),
                Err(e) => warn!(var = CLASS_IDENTIFIERS_ENV, error = %e, "ignoring class identifiers"),
            }
        }

        config
    }

    pub fn with_class_identifier(
        mut self,
        class_name: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.class_identifier_fields
            .insert(class_name.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn identity_strategy(&self) -> FieldIdentityStrategy {
        let mut strategy = FieldIdentityStrategy::new(self.identifier_fields.clone());
        for (class_name, fields) in &self.class_identifier_fields {
            strategy = strategy.with_class(class_name.clone(), fields.clone());
        }
        strategy
    }
}

pub fn parse_field_list(raw: &str) -> Result<Vec<String>, ConfigError> {
    let fields: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();

    if fields.is_empty() {
        return Err(ConfigError::EmptyFields);
    }
    Ok(fields)
}

pub fn parse_class_identifiers(raw: &str) -> Result<HashMap<String, Vec<String>>, ConfigError> {
    let mut out = HashMap::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (class_name, fields) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedEntry(entry.to_string()))?;
        let class_name = class_name.trim();
        if class_name.is_empty() {
            return Err(ConfigError::MalformedEntry(entry.to_string()));
        }
        out.insert(class_name.to_string(), parse_field_list(fields)?);
    }
    Ok(out)
}
