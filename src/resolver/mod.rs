//! Logical asset names to bundle identifiers
//!
//! The resolver is a pure function over a small ordered table of
//! categories. Each category may prefix a directory and rewrite the asset
//! name through a template before the identifier is lower-cased.

use crate::error::{BundleError, Result};
use crate::identity::BundleId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Placeholder substituted with the asset name inside a template
pub const NAME_PLACEHOLDER: &str = "{name}";

/// One named category in the resolver table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverEntry {
    /// Category name callers pass to `resolve`
    pub category: String,

    /// Directory prefix; a trailing `/` is added when missing
    #[serde(default)]
    pub directory: String,

    /// Optional name template, e.g. `"bgm_{name}"`
    #[serde(default)]
    pub template: Option<String>,

    /// Objects of this category are released right after extraction
    #[serde(default)]
    pub single_use: bool,
}

impl ResolverEntry {
    pub fn new(category: impl Into<String>, directory: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            directory: directory.into(),
            template: None,
            single_use: false,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn single_use(mut self) -> Self {
        self.single_use = true;
        self
    }

    fn apply_template(&self, name: &str) -> String {
        match &self.template {
            Some(template) if template.contains(NAME_PLACEHOLDER) => {
                template.replace(NAME_PLACEHOLDER, name)
            }
            Some(template) => format!("{name}{template}"),
            None => name.to_string(),
        }
    }
}

/// Maps (category, name, variant) to a [`BundleId`]
#[derive(Debug, Clone, Default)]
pub struct NameResolver {
    entries: Vec<ResolverEntry>,
    index: HashMap<String, usize>,
}

impl NameResolver {
    /// Build the table from an ordered list; the first entry for a category wins
    pub fn new(entries: impl IntoIterator<Item = ResolverEntry>) -> Self {
        let mut resolver = Self::default();
        for mut entry in entries {
            if resolver.index.contains_key(&entry.category) {
                log::warn!(
                    "Duplicate resolver category '{}' dropped; first registration wins",
                    entry.category
                );
                continue;
            }
            if !entry.directory.is_empty() && !entry.directory.ends_with('/') {
                entry.directory.push('/');
            }
            resolver
                .index
                .insert(entry.category.clone(), resolver.entries.len());
            resolver.entries.push(entry);
        }
        resolver
    }

    /// Look up a category
    pub fn entry(&self, category: &str) -> Option<&ResolverEntry> {
        self.index.get(category).map(|&i| &self.entries[i])
    }

    /// Registered categories in registration order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.category.as_str())
    }

    /// Resolve a logical name to a bundle identifier
    ///
    /// Unknown categories degrade to the un-prefixed identifier; only an
    /// empty asset name is an error.
    pub fn resolve(&self, category: &str, asset_name: &str, variant: &str) -> Result<BundleId> {
        if asset_name.is_empty() {
            return Err(BundleError::EmptyAssetName);
        }

        let entry = if category.is_empty() {
            None
        } else {
            let entry = self.entry(category);
            if entry.is_none() {
                log::warn!("Unknown category '{category}' for '{asset_name}', using flat identifier");
            }
            entry
        };

        let name = entry
            .map(|e| e.apply_template(asset_name))
            .unwrap_or_else(|| asset_name.to_string());

        let mut identifier = name;
        if !variant.is_empty() {
            identifier.push('.');
            identifier.push_str(variant);
        }

        if let Some(entry) = entry.filter(|e| !e.directory.is_empty()) {
            identifier = format!("{}{}", entry.directory, identifier);
        }

        let id = BundleId::new(identifier);
        log::trace!("Resolved {category}/{asset_name}/{variant} -> {id}");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> NameResolver {
        NameResolver::new(vec![
            ResolverEntry::new("se", "audio/"),
            ResolverEntry::new("bgm", "Audio/Music").with_template("bgm_{name}"),
            ResolverEntry::new("flat", ""),
            ResolverEntry::new("suffix", "fx/").with_template("_fx"),
        ])
    }

    #[test]
    fn test_resolve_with_directory() {
        let id = resolver().resolve("se", "click", "").unwrap();
        assert_eq!(id.as_str(), "audio/click");
    }

    #[test]
    fn test_resolve_lowercases_and_appends_variant() {
        let id = resolver().resolve("se", "Click", "HD").unwrap();
        assert_eq!(id.as_str(), "audio/click.hd");
    }

    #[test]
    fn test_resolve_template_and_missing_slash() {
        let id = resolver().resolve("bgm", "Title", "").unwrap();
        assert_eq!(id.as_str(), "audio/music/bgm_title");

        let id = resolver().resolve("suffix", "Spark", "").unwrap();
        assert_eq!(id.as_str(), "fx/spark_fx");
    }

    #[test]
    fn test_resolve_empty_or_unknown_category() {
        let r = resolver();
        assert_eq!(r.resolve("", "Hero", "v2").unwrap().as_str(), "hero.v2");
        assert_eq!(r.resolve("nope", "Hero", "").unwrap().as_str(), "hero");
        assert_eq!(r.resolve("flat", "Hero", "").unwrap().as_str(), "hero");
    }

    #[test]
    fn test_resolve_empty_name_fails() {
        assert!(matches!(
            resolver().resolve("se", "", ""),
            Err(BundleError::EmptyAssetName)
        ));
    }

    #[test]
    fn test_duplicate_category_first_wins() {
        let r = NameResolver::new(vec![
            ResolverEntry::new("se", "audio/"),
            ResolverEntry::new("se", "other/"),
        ]);
        assert_eq!(r.categories().count(), 1);
        assert_eq!(r.resolve("se", "click", "").unwrap().as_str(), "audio/click");
    }
}
