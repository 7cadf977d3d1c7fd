//! Translated rule texts.
//!
//! A [`TranslationProvider`] returns a map of text keys for a rule; only the
//! whitelisted keys in [`TRANSLATABLE_KEYS`] are ever applied to metadata.

use crate::error::ConfigError;
use crate::rule::RuleMetadata;

use std::collections::HashMap;
use std::path::Path;

/// Metadata fields a translation may replace.
pub const TRANSLATABLE_KEYS: [&str; 6] = [
    "name",
    "description",
    "precondition",
    "checklist_reference",
    "source",
    "documentation",
];

/// Source of translated texts for rules.
pub trait TranslationProvider: Send + Sync {
    /// Returns translated texts for a rule, keyed by metadata field name.
    fn translations_for_rule(&self, metadata: &RuleMetadata) -> HashMap<String, String>;
}

/// Applies whitelisted translations to metadata. Missing keys leave the text
/// unchanged; unknown keys are ignored.
pub fn apply_translations(metadata: &mut RuleMetadata, texts: &HashMap<String, String>) {
    for (key, text) in texts {
        match key.as_str() {
            "name" => metadata.name.clone_from(text),
            "description" => metadata.description.clone_from(text),
            "precondition" => metadata.precondition = Some(text.clone()),
            "checklist_reference" => metadata.checklist_reference = Some(text.clone()),
            "source" => metadata.source = Some(text.clone()),
            "documentation" => metadata.documentation = Some(text.clone()),
            _ => {}
        }
    }
}

/// In-memory translations keyed by resource name.
///
/// A rule is looked up by its translation resource name, or by its id when
/// it declares none.
///
/// ```toml
/// [GEO-1]
/// name = "Omriss må være lukket"
/// description = "Bygningens omriss må danne en lukket flate."
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticTranslations {
    resources: HashMap<String, HashMap<String, String>>,
}

impl StaticTranslations {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one text for a resource.
    #[must_use]
    pub fn with_text(
        mut self,
        resource: impl Into<String>,
        key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.resources
            .entry(resource.into())
            .or_default()
            .insert(key.into(), text.into());
        self
    }

    /// Parses translations from TOML, one table per resource.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is invalid or a value is
    /// not a string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let resources: HashMap<String, HashMap<String, String>> =
            toml::from_str(content).map_err(|e| ConfigError::Parse {
                message: e.to_string(),
            })?;
        Ok(Self { resources })
    }

    /// Loads translations from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Layers custom texts over these defaults; custom texts win per key.
    #[must_use]
    pub fn with_overrides(mut self, custom: StaticTranslations) -> Self {
        for (resource, texts) in custom.resources {
            self.resources.entry(resource).or_default().extend(texts);
        }
        self
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resource is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl TranslationProvider for StaticTranslations {
    fn translations_for_rule(&self, metadata: &RuleMetadata) -> HashMap<String, String> {
        let resource = metadata.translation.as_deref().unwrap_or(&metadata.id);
        self.resources.get(resource).cloned().unwrap_or_default()
    }
}
