//! First-clone scenarios: recursive replication, author re-linking, culture
//! remapping, prefixing, markdown safety, cycle handling and translator
//! outages.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use locsync_core::Link;
use locsync_engine::{CloneEngine, CloneRequest};
use support::*;

fn de_it_request(source: &str) -> CloneRequest {
    CloneRequest {
        source_entry_id: source.to_string(),
        source_language: None,
        target_language: "IT".to_string(),
    }
}

fn source_page() -> Vec<locsync_core::Entry> {
    vec![
        entry(
            "X",
            "cmsPage",
            3,
            vec![
                ("culture", text("de-DE")),
                ("title", text("Willkommen")),
                (
                    "teaserText",
                    text("## Hallo\n\n![Bild](https://cdn/a.jpg)"),
                ),
                ("slug", text("willkommen")),
                ("heroImage", asset_link("img-1")),
                ("authors", entry_links(&["A1"])),
                ("elements", entry_links(&["E1"])),
            ],
        ),
        entry(
            "A1",
            "author",
            1,
            vec![("name", text("Anna")), ("culture", text("de-DE"))],
        ),
        entry(
            "A2",
            "author",
            1,
            vec![("name", text("Anna")), ("culture", text("it-IT"))],
        ),
        entry("E1", "scText", 1, vec![("content", text("Mehr lesen"))]),
    ]
}

async fn run_clone(engine: &CloneEngine, source: &str) -> locsync_core::CloneOutcome {
    engine
        .clone_entry(&de_it_request(source), &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn first_clone_translates_and_relinks() {
    let cms = Arc::new(MockCms::new(source_page(), schemas()));
    let dir = TempDir::new().unwrap();
    let engine = engine(cms.clone(), Arc::new(MockTranslator::new()), &dir);

    let outcome = run_clone(&engine, "X").await;

    let clone = cms.entry(&outcome.cloned_entry_id);
    assert_eq!(clone.content_type, "cmsPage");
    assert_eq!(clone.any_text("title"), Some("[Clone] IT::Willkommen"));
    assert_eq!(clone.any_text("culture"), Some("it-IT"));
    assert_eq!(clone.any_text("slug"), Some(""));

    // Markdown: body translated, caption translated, URL untouched.
    let teaser = clone.any_text("teaserText").unwrap();
    assert!(teaser.contains("![IT::Bild](https://cdn/a.jpg)"));
    assert!(teaser.starts_with("IT::"));

    // Author re-linked to the existing it-IT author, no clone of A1.
    let authors = clone.any_value("authors").unwrap().links();
    assert_eq!(authors[0], &Link::entry("A2"));

    // Referenced element cloned and translated.
    let elements = clone.any_value("elements").unwrap().links();
    let element_clone = cms.entry(&elements[0].id);
    assert_ne!(element_clone.id, "E1");
    assert_eq!(element_clone.any_text("content"), Some("IT::Mehr lesen"));

    // Asset shared by reference.
    assert_eq!(
        clone.any_value("heroImage").unwrap().as_link(),
        Some(&Link::asset("img-1"))
    );

    // Relationship persisted with the full clone map.
    let store = store(&dir);
    let relationship = store
        .get("X", &outcome.cloned_entry_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(relationship.metadata.last_translated_version, 3);
    assert_eq!(
        relationship.clone_mapping.entry_target("A1"),
        Some(&"A2".to_string())
    );
    assert_eq!(
        relationship.clone_mapping.entry_target("E1"),
        Some(&element_clone.id)
    );
    assert_eq!(
        relationship.clone_mapping.entry_target("X"),
        Some(&outcome.cloned_entry_id)
    );

    // Initial tree snapshot written alongside.
    let tree = store
        .get_deep_map("X", &outcome.cloned_entry_id)
        .await
        .unwrap()
        .unwrap();
    assert!(tree.flattened_refs.contains_key("E1"));
}

#[tokio::test]
async fn source_language_is_detected_from_culture() {
    let cms = Arc::new(MockCms::new(source_page(), schemas()));
    let dir = TempDir::new().unwrap();
    let engine = engine(cms.clone(), Arc::new(MockTranslator::new()), &dir);

    // No sourceLanguage on the request; de-DE culture maps to DE.
    let outcome = run_clone(&engine, "X").await;
    let store = store(&dir);
    let relationship = store
        .get("X", &outcome.cloned_entry_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(relationship.translation_context.source_language, "DE");
    assert_eq!(relationship.translation_context.target_language, "IT");
}

#[tokio::test]
async fn clone_rejects_non_page_roots() {
    let cms = Arc::new(MockCms::new(source_page(), schemas()));
    let dir = TempDir::new().unwrap();
    let engine = engine(cms, Arc::new(MockTranslator::new()), &dir);

    let result = engine
        .clone_entry(&de_it_request("E1"), &CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(locsync_core::LocSyncError::Validation(_))
    ));
}

#[tokio::test]
async fn translator_outage_still_produces_a_complete_clone() {
    let cms = Arc::new(MockCms::new(source_page(), schemas()));
    let dir = TempDir::new().unwrap();
    let engine = engine(cms.clone(), Arc::new(BrokenTranslator), &dir);

    let outcome = run_clone(&engine, "X").await;
    let clone = cms.entry(&outcome.cloned_entry_id);

    // Source text kept, policies still applied.
    assert_eq!(clone.any_text("title"), Some("[Clone] Willkommen"));
    assert_eq!(clone.any_text("culture"), Some("it-IT"));
    assert_eq!(
        clone.any_text("teaserText"),
        Some("## Hallo\n\n![Bild](https://cdn/a.jpg)")
    );
    let authors = clone.any_value("authors").unwrap().links();
    assert_eq!(authors[0], &Link::entry("A2"));

    let elements = clone.any_value("elements").unwrap().links();
    assert_eq!(
        cms.entry(&elements[0].id).any_text("content"),
        Some("Mehr lesen")
    );
}

#[tokio::test]
async fn shared_references_resolve_to_one_clone() {
    let mut entries = source_page();
    entries.push(entry(
        "E2",
        "scText",
        1,
        vec![("content", text("Geteilt")), ("elements", entry_links(&["E1"]))],
    ));
    // X references E1 twice: directly and through E2.
    entries[0]
        .fields
        .insert("elements".to_string(), entry_links(&["E1", "E2", "E1"]));

    let cms = Arc::new(MockCms::new(entries, schemas()));
    let dir = TempDir::new().unwrap();
    let engine = engine(cms.clone(), Arc::new(MockTranslator::new()), &dir);

    let outcome = run_clone(&engine, "X").await;
    let clone = cms.entry(&outcome.cloned_entry_id);
    let elements = clone.any_value("elements").unwrap().links();

    // Both occurrences of E1 point at the same target.
    assert_eq!(elements[0].id, elements[2].id);
    let e2_clone = cms.entry(&elements[1].id);
    let nested = e2_clone.any_value("elements").unwrap().links();
    assert_eq!(nested[0].id, elements[0].id);
}

#[tokio::test]
async fn cycles_clone_each_entry_once_and_cross_link() {
    let entries = vec![
        entry(
            "A",
            "cmsPage",
            1,
            vec![("culture", text("de-DE")), ("elements", entry_links(&["B"]))],
        ),
        entry(
            "B",
            "scText",
            1,
            vec![("content", text("Zyklus")), ("elements", entry_links(&["A"]))],
        ),
    ];
    let cms = Arc::new(MockCms::new(entries, schemas()));
    let dir = TempDir::new().unwrap();
    let engine = engine(cms.clone(), Arc::new(MockTranslator::new()), &dir);

    let before = cms.entry_count();
    let outcome = run_clone(&engine, "A").await;
    // Exactly two new entries: A' and B'.
    assert_eq!(cms.entry_count(), before + 2);

    let a_clone = cms.entry(&outcome.cloned_entry_id);
    let b_clone_id = a_clone.any_value("elements").unwrap().links()[0].id.clone();
    let b_clone = cms.entry(&b_clone_id);

    // The cycle is closed between the clones, not back into the source.
    assert_eq!(
        b_clone.any_value("elements").unwrap().links()[0],
        &Link::entry(&outcome.cloned_entry_id)
    );
}

#[tokio::test]
async fn empty_translatable_field_is_not_sent_to_the_provider() {
    let mut entries = source_page();
    entries[0].fields.insert("title".to_string(), text(" "));
    let cms = Arc::new(MockCms::new(entries, schemas()));
    let dir = TempDir::new().unwrap();
    let translator = Arc::new(MockTranslator::new());
    let engine = engine(cms.clone(), translator.clone(), &dir);

    let outcome = run_clone(&engine, "X").await;
    let clone = cms.entry(&outcome.cloned_entry_id);
    assert_eq!(clone.any_text("title"), Some(" "));

    // Calls cover teaser body, caption and E1 content only.
    assert_eq!(translator.calls.load(Ordering::SeqCst), 3);
}
