//! Management-API envelope shapes, unwrapped into the core model.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use locsync_core::{ContentTypeSchema, Entry, FieldDef, LocalizedValue};

#[derive(Debug, Deserialize)]
pub(crate) struct SysId {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TypedLink {
    pub sys: SysId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EntrySys {
    pub id: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub content_type: TypedLink,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntryEnvelope {
    pub sys: EntrySys,
    #[serde(default)]
    pub fields: BTreeMap<String, LocalizedValue>,
}

impl EntryEnvelope {
    pub fn into_entry(self) -> Entry {
        Entry {
            id: self.sys.id,
            content_type: self.sys.content_type.sys.id,
            version: self.sys.version,
            updated_at: self.sys.updated_at,
            fields: self.fields,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntryCollection {
    #[serde(default)]
    pub items: Vec<EntryEnvelope>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentTypeEnvelope {
    pub sys: SysId,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl ContentTypeEnvelope {
    pub fn into_schema(self) -> ContentTypeSchema {
        ContentTypeSchema {
            id: self.sys.id,
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locsync_core::{FieldType, FieldValue};
    use serde_json::json;

    #[test]
    fn entry_envelope_unwraps_sys() {
        let raw = json!({
            "sys": {
                "id": "x1",
                "version": 3,
                "updatedAt": "2024-05-01T10:00:00Z",
                "contentType": {"sys": {"id": "cmsPage"}}
            },
            "fields": {
                "title": {"en-US-POSIX": "Willkommen"},
                "elements": {"en-US-POSIX": [
                    {"sys": {"type": "Link", "linkType": "Entry", "id": "e1"}}
                ]}
            }
        });
        let entry = serde_json::from_value::<EntryEnvelope>(raw)
            .unwrap()
            .into_entry();
        assert_eq!(entry.id, "x1");
        assert_eq!(entry.content_type, "cmsPage");
        assert_eq!(entry.version, 3);
        assert_eq!(entry.any_text("title"), Some("Willkommen"));
        let links: Vec<_> = entry.any_value("elements").unwrap().links();
        assert_eq!(links[0].id, "e1");
    }

    #[test]
    fn content_type_envelope_keeps_field_order_and_tolerates_unknown_types() {
        let raw = json!({
            "sys": {"id": "cmsPage"},
            "fields": [
                {"id": "title", "type": "Symbol", "required": true, "localized": false},
                {"id": "body", "type": "RichText"},
                {"id": "pageType", "type": "Symbol", "validations": [{"in": ["article"]}]}
            ]
        });
        let schema = serde_json::from_value::<ContentTypeEnvelope>(raw)
            .unwrap()
            .into_schema();
        assert_eq!(schema.fields[0].id, "title");
        assert_eq!(schema.fields[1].field_type, FieldType::Unsupported);
        assert_eq!(schema.fields[2].first_allowed(), Some("article"));
        assert!(matches!(
            serde_json::from_value::<FieldValue>(json!("plain")).unwrap(),
            FieldValue::Text(_)
        ));
    }
}
