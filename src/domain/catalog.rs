//! Intake definitions and loading.
//!
//! An intake definition is the static shape of one intake form: ordered
//! categories, the field specs inside them, and optional per-field prompt
//! templates. Definitions are data loaded at session start, never
//! hard-coded branches.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Data type of an intake field, enforced at merge time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    /// Short free text
    Text,

    /// Email address
    Email,

    /// Phone number
    Phone,

    /// Multi-sentence free text
    LongText,

    /// One of a fixed set of options
    Enumerated,

    /// Calendar date
    Date,
}

/// Static schema entry for a single intake field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Unique key within the definition
    pub name: String,

    /// Human-readable label used in prompts
    pub label: String,

    /// Data type the accepted value must conform to
    pub data_type: DataType,

    /// Whether the field blocks completion while unset
    #[serde(default)]
    pub required: bool,

    /// Key of the category this field belongs to
    pub category: String,

    /// Allowed values for enumerated fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    /// Bespoke prompt template ("{label}" is substituted); a generic
    /// fallback is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Named, ordered group of fields traversed as a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    /// Key referenced by FieldSpec.category
    pub key: String,

    /// Human-readable title used in transition prompts
    pub title: String,
}

/// A complete intake definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeDefinition {
    /// Definition name (used in session records)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Categories in fixed traversal order
    pub categories: Vec<Category>,

    /// All field specs, in display order
    pub fields: Vec<FieldSpec>,

    /// Field holding a 0-10 severity scale, used for priority triage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_field: Option<String>,
}

impl IntakeDefinition {
    /// Load a definition from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read definition file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a definition from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse intake definition YAML")
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Definition name cannot be empty");
        }

        if self.categories.is_empty() {
            anyhow::bail!("Definition must have at least one category");
        }

        if self.fields.is_empty() {
            anyhow::bail!("Definition must have at least one field");
        }

        let mut category_keys = HashSet::new();
        for category in &self.categories {
            if category.key.is_empty() {
                anyhow::bail!("Category key cannot be empty");
            }
            if !category_keys.insert(category.key.as_str()) {
                anyhow::bail!("Duplicate category key: '{}'", category.key);
            }
        }

        let mut field_names = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                anyhow::bail!("Field name cannot be empty");
            }
            if !field_names.insert(field.name.as_str()) {
                anyhow::bail!("Duplicate field name: '{}'", field.name);
            }
            if !category_keys.contains(field.category.as_str()) {
                anyhow::bail!(
                    "Field '{}' references unknown category '{}'",
                    field.name,
                    field.category
                );
            }
            if field.data_type == DataType::Enumerated && field.options.is_empty() {
                anyhow::bail!("Enumerated field '{}' has no options", field.name);
            }
        }

        // A category with no fields would stall the traversal.
        for category in &self.categories {
            if !self.fields.iter().any(|f| f.category == category.key) {
                anyhow::bail!("Category '{}' has no fields", category.key);
            }
        }

        if let Some(ref severity) = self.severity_field {
            if !field_names.contains(severity.as_str()) {
                anyhow::bail!("severity_field '{}' is not a defined field", severity);
            }
        }

        Ok(())
    }

    /// Look up a field spec by name
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields belonging to a category, in definition order
    pub fn fields_in_category(&self, category_key: &str) -> Vec<&FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.category == category_key)
            .collect()
    }

    /// All required fields across the whole definition
    pub fn required_fields(&self) -> Vec<&FieldSpec> {
        self.fields.iter().filter(|f| f.required).collect()
    }

    /// Number of required fields
    pub fn required_count(&self) -> usize {
        self.fields.iter().filter(|f| f.required).count()
    }

    /// Index of a category by key
    pub fn category_index(&self, key: &str) -> Option<usize> {
        self.categories.iter().position(|c| c.key == key)
    }

    /// Category at a traversal index
    pub fn category_at(&self, index: usize) -> Option<&Category> {
        self.categories.get(index)
    }
}
