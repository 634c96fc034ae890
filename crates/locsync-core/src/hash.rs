//! Content hashing over canonical JSON. `BTreeMap`-backed values give a
//! stable key order, so equal values always serialize to equal bytes.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::policy::FieldPolicy;
use crate::types::{Entry, FieldHashes, FieldId, LocalizedValue};
use crate::Result;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash of one localized field value.
pub fn hash_field_value(value: &LocalizedValue) -> Result<String> {
    let canonical = serde_json::to_string(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Per-field hashes over the fields the policy marks translatable.
pub fn field_hashes(entry: &Entry, policy: &FieldPolicy) -> Result<FieldHashes> {
    let mut hashes = FieldHashes::new();
    for (field_id, value) in &entry.fields {
        if policy.is_translatable(field_id, value) {
            hashes.insert(field_id.clone(), hash_field_value(value)?);
        }
    }
    Ok(hashes)
}

/// One hash over all translatable fields of an entry, used as the per-node
/// content hash in reference trees.
pub fn entry_content_hash(entry: &Entry, policy: &FieldPolicy) -> Result<String> {
    let translatable: BTreeMap<&FieldId, &LocalizedValue> = entry
        .fields
        .iter()
        .filter(|(field_id, value)| policy.is_translatable(field_id, value))
        .collect();
    let canonical = serde_json::to_string(&translatable)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn entry_with(fields: Vec<(&str, FieldValue)>) -> Entry {
        let mut map = BTreeMap::new();
        for (id, value) in fields {
            let mut localized = LocalizedValue::new();
            localized.insert("en-US-POSIX".to_string(), value);
            map.insert(id.to_string(), localized);
        }
        Entry {
            id: "e1".into(),
            content_type: "cmsPage".into(),
            version: 1,
            updated_at: Utc::now(),
            fields: map,
        }
    }

    #[test]
    fn equal_values_hash_equal() {
        let a = entry_with(vec![("title", FieldValue::Text("Hallo".into()))]);
        let b = entry_with(vec![("title", FieldValue::Text("Hallo".into()))]);
        let policy = FieldPolicy::default();
        assert_eq!(
            entry_content_hash(&a, &policy).unwrap(),
            entry_content_hash(&b, &policy).unwrap()
        );
    }

    #[test]
    fn content_hash_ignores_untranslatable_fields() {
        let policy = FieldPolicy::default();
        let a = entry_with(vec![
            ("title", FieldValue::Text("Hallo".into())),
            ("slug", FieldValue::Text("hallo".into())),
        ]);
        let b = entry_with(vec![
            ("title", FieldValue::Text("Hallo".into())),
            ("slug", FieldValue::Text("welt".into())),
        ]);
        assert_eq!(
            entry_content_hash(&a, &policy).unwrap(),
            entry_content_hash(&b, &policy).unwrap()
        );
    }

    #[test]
    fn field_hashes_cover_translatable_fields_only() {
        let policy = FieldPolicy::default();
        let entry = entry_with(vec![
            ("title", FieldValue::Text("Hallo".into())),
            ("slug", FieldValue::Text("hallo".into())),
            ("teaserText", FieldValue::Text("## Hi".into())),
        ]);
        let hashes = field_hashes(&entry, &policy).unwrap();
        assert!(hashes.contains_key("title"));
        assert!(hashes.contains_key("teaserText"));
        assert!(!hashes.contains_key("slug"));
    }

    #[test]
    fn changed_value_changes_hash() {
        let policy = FieldPolicy::default();
        let a = entry_with(vec![("title", FieldValue::Text("Hallo".into()))]);
        let b = entry_with(vec![("title", FieldValue::Text("Servus".into()))]);
        assert_ne!(
            entry_content_hash(&a, &policy).unwrap(),
            entry_content_hash(&b, &policy).unwrap()
        );
    }
}
