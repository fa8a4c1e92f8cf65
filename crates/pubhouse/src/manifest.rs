//! Package manifest (`pubspec.yaml`) parsing and package naming rules

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{ArchiveError, Result};
use crate::version::parse_version;

/// File name of the manifest inside a package archive
pub const MANIFEST_FILE: &str = "pubspec.yaml";

/// Fields of a package manifest the registry cares about
///
/// The raw manifest text is kept alongside so it can be stored verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Dependency name -> constraint as written (non-string constraints rendered as JSON)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(skip)]
    raw: String,
}

impl Manifest {
    /// Parse and validate manifest text
    ///
    /// Requires a YAML mapping with string `name` and `version` fields, a valid
    /// package name and a semantic version.
    pub fn parse(text: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| ArchiveError::manifest_invalid(format!("not valid YAML: {}", e)))?;

        let mapping = document
            .as_mapping()
            .ok_or_else(|| ArchiveError::manifest_invalid("top level must be a mapping"))?;

        let name = required_string(mapping, "name")?;
        let version = required_string(mapping, "version")?;

        validate_package_name(&name)?;
        parse_version(&version)?;

        Ok(Self {
            description: optional_string(mapping, "description"),
            homepage: optional_string(mapping, "homepage"),
            repository: optional_string(mapping, "repository"),
            documentation: optional_string(mapping, "documentation"),
            license: optional_string(mapping, "license"),
            dependencies: dependency_map(mapping),
            name,
            version,
            raw: text.to_string(),
        })
    }

    /// The manifest exactly as uploaded
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Render the full manifest document as JSON
    pub fn to_json(&self) -> Result<serde_json::Value> {
        manifest_to_json(&self.raw)
    }
}

/// Convert stored manifest text to JSON for API responses
pub fn manifest_to_json(text: &str) -> Result<serde_json::Value> {
    serde_yaml::from_str::<serde_json::Value>(text)
        .map_err(|e| ArchiveError::manifest_invalid(format!("cannot be represented as JSON: {}", e)))
}

/// Check a package name against `^[a-z][a-z0-9_]*$`
pub fn is_valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Like [`is_valid_package_name`] but returns the rejection as an error
pub fn validate_package_name(name: &str) -> Result<()> {
    if is_valid_package_name(name) {
        Ok(())
    } else {
        Err(ArchiveError::InvalidName {
            name: name.to_string(),
        })
    }
}

fn required_string(mapping: &serde_yaml::Mapping, key: &str) -> Result<String> {
    match mapping.get(key) {
        Some(serde_yaml::Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ArchiveError::manifest_invalid(format!(
            "`{}` must be a string",
            key
        ))),
        None => Err(ArchiveError::manifest_invalid(format!(
            "missing required field `{}`",
            key
        ))),
    }
}

fn optional_string(mapping: &serde_yaml::Mapping, key: &str) -> Option<String> {
    mapping
        .get(key)
        .and_then(|value| value.as_str())
        .map(str::to_string)
}

fn dependency_map(mapping: &serde_yaml::Mapping) -> BTreeMap<String, String> {
    let Some(dependencies) = mapping.get("dependencies").and_then(|d| d.as_mapping()) else {
        return BTreeMap::new();
    };

    dependencies
        .iter()
        .filter_map(|(name, constraint)| {
            let name = name.as_str()?.to_string();
            let constraint = match constraint {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Null => "any".to_string(),
                other => serde_json::to_string(other).unwrap_or_default(),
            };
            Some((name, constraint))
        })
        .collect()
}
