//! Field classification rules and the culture mapping. Pure and stateless:
//! the engine resolves a `FieldKind` once per (content type, field) and
//! dispatches on it instead of scattering string checks.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{FieldDef, FieldType, FieldValue, LocaleTag, LocalizedValue};

/// What the engine should do with a field while cloning or updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Redirect author links to an existing target-culture author.
    Author,
    /// Emit a typed empty value instead of the source value.
    EmptyOnClone,
    /// Pass the value through; only links inside it are rewritten.
    CopyAsIs,
    /// Receives the target locale tag.
    Culture,
    /// Translate through the markdown-safe path.
    Markdown,
    /// Translate as plain text.
    Translatable,
    /// Everything else: copied, with links recursed and rewritten.
    Untranslated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPolicy {
    /// Scalar string fields that get the clone prefix prepended.
    pub prefix_fields: BTreeSet<String>,
    pub clone_prefix: String,
    /// Fields emitted as a typed empty value on clone.
    pub empty_on_clone: BTreeSet<String>,
    /// Fields whose values pass through untranslated (links still rewritten).
    pub copy_as_is: BTreeSet<String>,
    /// Link fields holding authors, re-linked to target-culture authors.
    pub author_fields: BTreeSet<String>,
    pub author_content_type: String,
    pub author_name_field: String,
    pub author_culture_field: String,
    /// Per-content-type markdown field allowlist.
    pub markdown_fields: BTreeMap<String, BTreeSet<String>>,
    /// Fields never sent to the translator.
    pub non_translatable: BTreeSet<String>,
    /// Link fields the reference tracker does not descend into.
    pub untracked_link_fields: BTreeSet<String>,
    /// Content type a clone must be rooted at.
    pub root_content_type: String,
    pub culture_map: CultureMap,
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

impl Default for FieldPolicy {
    fn default() -> Self {
        let mut markdown_fields = BTreeMap::new();
        markdown_fields.insert("cmsPage".to_string(), set(&["teaserText"]));
        markdown_fields.insert("scText".to_string(), set(&["content"]));
        markdown_fields.insert("scSuperhero".to_string(), set(&["text", "bulletList"]));

        FieldPolicy {
            prefix_fields: set(&["title"]),
            clone_prefix: "[Clone] ".to_string(),
            empty_on_clone: set(&["slug", "parentPage", "productionUrl", "authors"]),
            copy_as_is: set(&[
                "domain",
                "pageType",
                "productionUrl",
                "makeModel",
                "publicationDate",
                "lastModificationDate",
                "makeIds",
                "modelIds",
                "trackingName",
            ]),
            author_fields: set(&["authors"]),
            author_content_type: "author".to_string(),
            author_name_field: "name".to_string(),
            author_culture_field: "culture".to_string(),
            markdown_fields,
            non_translatable: set(&[
                "id",
                "slug",
                "internalName",
                "culture",
                "domain",
                "pageType",
                "publicationDate",
                "lastModificationDate",
                "trackingName",
                "fieldStatus",
                "automationTags",
                "makeModel",
                "makeIds",
                "modelIds",
            ]),
            untracked_link_fields: set(&[
                "parentPage",
                "authors",
                "makeModel",
                "makeIds",
                "modelIds",
                "trackingName",
                "internalName",
                "fieldStatus",
                "automationTags",
                "culture",
                "domain",
                "pageType",
            ]),
            root_content_type: "cmsPage".to_string(),
            culture_map: CultureMap::default(),
        }
    }
}

impl FieldPolicy {
    /// Resolves the field kind the engine dispatches on. Author re-linking
    /// wins over the empty set so a matched author survives the clone.
    pub fn classify(&self, content_type: &str, field_id: &str, value: &LocalizedValue) -> FieldKind {
        if self.author_fields.contains(field_id) {
            return FieldKind::Author;
        }
        if self.empty_on_clone.contains(field_id) {
            return FieldKind::EmptyOnClone;
        }
        if self.copy_as_is.contains(field_id) {
            return FieldKind::CopyAsIs;
        }
        if Self::is_culture_field(field_id) {
            return FieldKind::Culture;
        }
        if self.is_markdown(content_type, field_id) {
            return FieldKind::Markdown;
        }
        if self.is_translatable(field_id, value) {
            return FieldKind::Translatable;
        }
        FieldKind::Untranslated
    }

    /// A field is translatable iff it is not denylisted, carries no links,
    /// and resolves to a non-empty string in some locale.
    pub fn is_translatable(&self, field_id: &str, value: &LocalizedValue) -> bool {
        if self.non_translatable.contains(field_id) || Self::is_culture_field(field_id) {
            return false;
        }
        if value.values().any(FieldValue::is_link_bearing) {
            return false;
        }
        value
            .values()
            .any(|v| v.as_text().is_some_and(|s| !s.trim().is_empty()))
    }

    pub fn is_markdown(&self, content_type: &str, field_id: &str) -> bool {
        self.markdown_fields
            .get(content_type)
            .is_some_and(|fields| fields.contains(field_id))
    }

    pub fn is_culture_field(field_id: &str) -> bool {
        field_id.to_lowercase().contains("culture")
    }

    /// Whether the tracker should descend into links under this field.
    pub fn is_trackable_link_field(&self, field_id: &str) -> bool {
        !self.untracked_link_fields.contains(field_id)
    }

    pub fn prefix_applies(&self, field_id: &str) -> bool {
        self.prefix_fields.contains(field_id)
    }

    /// Typed empty value for the empty-on-clone set. Fields without a typed
    /// default (links, numbers, dates) are skipped.
    pub fn empty_value_for(field_type: FieldType) -> Option<FieldValue> {
        match field_type {
            FieldType::Symbol | FieldType::Text => Some(FieldValue::Text(String::new())),
            FieldType::Array => Some(FieldValue::List(Vec::new())),
            FieldType::Object => Some(FieldValue::Object(BTreeMap::new())),
            _ => None,
        }
    }

    /// Default for a required field absent in the source: the first enum
    /// symbol when one is declared, otherwise a type-specific zero value.
    pub fn default_value_for(def: &FieldDef) -> Option<FieldValue> {
        if let Some(symbol) = def.first_allowed() {
            return Some(FieldValue::Text(symbol.to_string()));
        }
        match def.field_type {
            FieldType::Symbol | FieldType::Text => Some(FieldValue::Text(String::new())),
            FieldType::Integer => Some(FieldValue::Integer(0)),
            FieldType::Number => Some(FieldValue::Number(0.0)),
            FieldType::Boolean => Some(FieldValue::Bool(false)),
            FieldType::Date => Some(FieldValue::Text(chrono::Utc::now().to_rfc3339())),
            FieldType::Array => Some(FieldValue::List(Vec::new())),
            FieldType::Object => Some(FieldValue::Object(BTreeMap::new())),
            FieldType::Link | FieldType::Unsupported => None,
        }
    }
}

/// Provider language code <-> stored locale tag mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CultureMap(BTreeMap<String, LocaleTag>);

impl Default for CultureMap {
    fn default() -> Self {
        let pairs = [
            ("DE", "de-DE"),
            ("IT", "it-IT"),
            ("EN", "en-GB"),
            ("EN-GB", "en-GB"),
            ("EN-US", "en-US"),
            ("FR", "fr-FR"),
            ("FR-CA", "fr-CA"),
            ("ES", "es-ES"),
            ("PT-PT", "pt-PT"),
            ("PT-BR", "pt-BR"),
            ("NL", "nl-NL"),
            ("NL-BE", "nl-BE"),
            ("PL", "pl-PL"),
            ("SV", "sv-SE"),
            ("DA", "da-DK"),
            ("NB", "nb-NO"),
            ("FI", "fi-FI"),
            ("CS", "cs-CZ"),
            ("JA", "ja-JP"),
            ("ZH", "zh-CN"),
        ];
        CultureMap(
            pairs
                .iter()
                .map(|(code, tag)| (code.to_string(), tag.to_string()))
                .collect(),
        )
    }
}

impl CultureMap {
    /// Stored locale tag for a provider language code.
    pub fn locale_for(&self, provider_code: &str) -> Option<&LocaleTag> {
        self.0.get(&provider_code.to_uppercase())
    }

    /// Inverse lookup: the provider code for a stored locale tag, used to
    /// auto-detect the source language from a culture field. The first match
    /// in code order wins, which prefers the plain code (DE over DE-AT style
    /// variants) as the provider expects for source languages.
    pub fn provider_for(&self, locale: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, tag)| tag.eq_ignore_ascii_case(locale))
            .map(|(code, _)| code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Link, Validation};

    fn localized(value: FieldValue) -> LocalizedValue {
        let mut map = LocalizedValue::new();
        map.insert("en-US-POSIX".to_string(), value);
        map
    }

    #[test]
    fn author_wins_over_empty_set() {
        let policy = FieldPolicy::default();
        let value = localized(FieldValue::List(vec![FieldValue::Link(Link::entry("a1"))]));
        assert_eq!(policy.classify("cmsPage", "authors", &value), FieldKind::Author);
    }

    #[test]
    fn slug_is_emptied_not_translated() {
        let policy = FieldPolicy::default();
        let value = localized(FieldValue::Text("my-page".into()));
        assert_eq!(
            policy.classify("cmsPage", "slug", &value),
            FieldKind::EmptyOnClone
        );
    }

    #[test]
    fn culture_substring_matches_case_insensitively() {
        assert!(FieldPolicy::is_culture_field("culture"));
        assert!(FieldPolicy::is_culture_field("pageCulture"));
        assert!(!FieldPolicy::is_culture_field("title"));
    }

    #[test]
    fn markdown_allowlist_is_per_content_type() {
        let policy = FieldPolicy::default();
        assert!(policy.is_markdown("scText", "content"));
        assert!(!policy.is_markdown("cmsPage", "content"));
        let value = localized(FieldValue::Text("## Hallo".into()));
        assert_eq!(
            policy.classify("cmsPage", "teaserText", &value),
            FieldKind::Markdown
        );
    }

    #[test]
    fn link_fields_are_not_translatable() {
        let policy = FieldPolicy::default();
        let value = localized(FieldValue::List(vec![FieldValue::Link(Link::entry("e"))]));
        assert!(!policy.is_translatable("elements", &value));
        assert_eq!(
            policy.classify("cmsPage", "elements", &value),
            FieldKind::Untranslated
        );
    }

    #[test]
    fn empty_string_is_not_translatable() {
        let policy = FieldPolicy::default();
        assert!(!policy.is_translatable("title", &localized(FieldValue::Text("  ".into()))));
        assert!(policy.is_translatable("title", &localized(FieldValue::Text("Hallo".into()))));
    }

    #[test]
    fn enum_default_uses_first_symbol() {
        let def = FieldDef {
            id: "pageType".into(),
            field_type: FieldType::Symbol,
            required: true,
            validations: vec![Validation {
                allowed: vec!["article".into(), "landing".into()],
            }],
        };
        assert_eq!(
            FieldPolicy::default_value_for(&def),
            Some(FieldValue::Text("article".into()))
        );
    }

    #[test]
    fn culture_map_inverse_prefers_plain_code() {
        let map = CultureMap::default();
        assert_eq!(map.locale_for("it"), Some(&"it-IT".to_string()));
        assert_eq!(map.provider_for("de-DE"), Some("DE"));
        assert_eq!(map.provider_for("en-GB"), Some("EN"));
    }
}
