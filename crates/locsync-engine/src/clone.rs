//! The recursive cloner. Walks the source graph depth-first, creating one
//! draft clone per reachable entry, rewriting links through the in-run
//! clone map and translating text along the way. The clone map doubles as
//! the memo that deduplicates shared references and, together with the
//! processing set, breaks cycles.

use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use locsync_core::hash::field_hashes;
use locsync_core::{
    CloneMap, CloneOutcome, CmsClient, ContentTypeSchema, Entry, EntryCloneResult, EntryId,
    EntryQuery, FieldId, FieldKind, FieldPolicy, FieldValue, Link, LinkKind, LocSyncError,
    LocaleTag, LocalizedValue, Relationship, RelationshipMetadata, RelationshipStore, Result,
    TranslationContext, Translator,
};
use locsync_tracker::ReferenceTracker;

use crate::text::translate_field_text;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub storage_locale: LocaleTag,
    pub max_depth: u32,
    pub auto_translate_new_refs: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            storage_locale: "en-US-POSIX".to_string(),
            max_depth: 3,
            auto_translate_new_refs: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub source_entry_id: EntryId,
    pub source_language: Option<String>,
    pub target_language: String,
}

pub struct CloneEngine {
    pub(crate) cms: Arc<dyn CmsClient>,
    pub(crate) translator: Arc<dyn Translator>,
    pub(crate) store: Arc<dyn RelationshipStore>,
    pub(crate) policy: Arc<FieldPolicy>,
    pub(crate) options: EngineOptions,
    pub(crate) tracker: ReferenceTracker,
}

/// Per-run translation parameters.
pub(crate) struct CloneContext {
    pub translation: TranslationContext,
    pub target_locale: LocaleTag,
    pub cancel: CancellationToken,
}

/// In-run state: the clone map memo, the on-stack set for cycle breaking,
/// the per-run schema cache and per-entry results. Entries that had to emit
/// an unresolved cycle link are queued for a repair pass once every clone
/// in the run exists.
#[derive(Default)]
pub(crate) struct RunState {
    pub clone_map: CloneMap,
    pub processing: HashSet<EntryId>,
    pub schemas: HashMap<String, Option<ContentTypeSchema>>,
    pub results: Vec<EntryCloneResult>,
    pub cycle_sources: HashSet<EntryId>,
    pub deferred_targets: Vec<EntryId>,
}

impl CloneEngine {
    pub fn new(
        cms: Arc<dyn CmsClient>,
        translator: Arc<dyn Translator>,
        store: Arc<dyn RelationshipStore>,
        policy: Arc<FieldPolicy>,
        options: EngineOptions,
    ) -> Self {
        let tracker = ReferenceTracker::new(cms.clone(), policy.clone(), options.max_depth);
        CloneEngine {
            cms,
            translator,
            store,
            policy,
            options,
            tracker,
        }
    }

    pub fn tracker(&self) -> &ReferenceTracker {
        &self.tracker
    }

    /// First clone: recursively replicates the source entry into the target
    /// language, persists the relationship and the initial tree snapshot.
    pub async fn clone_entry(
        &self,
        request: &CloneRequest,
        cancel: &CancellationToken,
    ) -> Result<CloneOutcome> {
        let source = self.cms.get_entry(&request.source_entry_id).await?;
        if source.content_type != self.policy.root_content_type {
            return Err(LocSyncError::Validation(format!(
                "clone must start at a {} entry, got {}",
                self.policy.root_content_type, source.content_type
            )));
        }

        let source_language = match &request.source_language {
            Some(lang) => lang.clone(),
            None => self.detect_source_language(&source)?,
        };
        let target_locale = self
            .policy
            .culture_map
            .locale_for(&request.target_language)
            .ok_or_else(|| {
                LocSyncError::Validation(format!(
                    "no locale mapping for target language {}",
                    request.target_language
                ))
            })?
            .clone();

        info!(
            source_id = %source.id,
            source_language,
            target_language = %request.target_language,
            "starting recursive clone"
        );

        let ctx = CloneContext {
            translation: TranslationContext {
                source_language,
                target_language: request.target_language.clone(),
            },
            target_locale: target_locale.clone(),
            cancel: cancel.clone(),
        };
        let mut state = RunState::default();

        let cloned_entry_id = self
            .clone_recursive(&ctx, &mut state, source.id.clone())
            .await?;
        self.repair_cycle_links(&mut state).await;

        let now = Utc::now();
        let relationship = Relationship {
            source_entry_id: source.id.clone(),
            target_entry_id: cloned_entry_id.clone(),
            metadata: RelationshipMetadata {
                last_translated_version: source.version,
                created_at: now,
                last_updated: now,
            },
            translation_context: ctx.translation.clone(),
            field_hashes: field_hashes(&source, &self.policy)?,
            clone_mapping: state.clone_map.clone(),
            deep_reference_map: None,
            backup_data: None,
        };
        self.store.store(&relationship).await?;

        let tracked = self.tracker.build_tree(&source.id, &cloned_entry_id).await?;
        self.store.store_deep_map(&tracked.tree).await?;

        info!(
            source_id = %source.id,
            cloned_entry_id = %cloned_entry_id,
            entries_cloned = state.results.len(),
            "recursive clone finished"
        );

        Ok(CloneOutcome {
            original_entry_id: source.id,
            cloned_entry_id,
            target_locale,
            clone_mapping: state.clone_map,
            results: state.results,
        })
    }

    /// The source language is read off the source entry's culture field when
    /// the caller does not supply one. Only works for roots whose content
    /// type carries a culture field.
    fn detect_source_language(&self, source: &Entry) -> Result<String> {
        let culture = source
            .fields
            .iter()
            .find(|(field_id, _)| FieldPolicy::is_culture_field(field_id))
            .and_then(|(_, localized)| localized.values().next())
            .and_then(FieldValue::as_text)
            .ok_or_else(|| {
                LocSyncError::Validation(
                    "source entry has no culture field; pass sourceLanguage explicitly".into(),
                )
            })?;
        self.policy
            .culture_map
            .provider_for(culture)
            .map(str::to_string)
            .ok_or_else(|| {
                LocSyncError::Validation(format!("source culture {culture} maps to no known language"))
            })
    }

    pub(crate) async fn schema_for<'a>(
        &self,
        content_type: &str,
        schemas: &'a mut HashMap<String, Option<ContentTypeSchema>>,
    ) -> &'a Option<ContentTypeSchema> {
        if !schemas.contains_key(content_type) {
            let schema = match self.cms.get_content_type(content_type).await {
                Ok(schema) => Some(schema),
                Err(e) => {
                    warn!(content_type, error = %e, "content type fetch failed, using stored field order");
                    None
                }
            };
            schemas.insert(content_type.to_string(), schema);
        }
        &schemas[content_type]
    }

    fn ordered_fields(schema: &Option<ContentTypeSchema>, entry: &Entry) -> Vec<FieldId> {
        let mut ordered = Vec::with_capacity(entry.fields.len());
        if let Some(schema) = schema {
            for def in &schema.fields {
                ordered.push(def.id.clone());
            }
        }
        for field_id in entry.fields.keys() {
            if !ordered.contains(field_id) {
                ordered.push(field_id.clone());
            }
        }
        ordered
    }

    pub(crate) fn clone_recursive<'a>(
        &'a self,
        ctx: &'a CloneContext,
        state: &'a mut RunState,
        source_id: EntryId,
    ) -> BoxFuture<'a, Result<EntryId>> {
        Box::pin(async move {
            if ctx.cancel.is_cancelled() {
                return Err(LocSyncError::Cancelled);
            }
            if let Some(target_id) = state.clone_map.entry_target(&source_id) {
                return Ok(target_id.clone());
            }

            let entry = self.cms.get_entry(&source_id).await?;
            let schema = self.schema_for(&entry.content_type, &mut state.schemas).await.clone();

            state.processing.insert(source_id.clone());
            let build_result = self.build_clone_fields(ctx, state, &entry, &schema).await;
            state.processing.remove(&source_id);
            let new_fields = build_result?;

            let created = match self.cms.create_entry(&entry.content_type, new_fields).await {
                Ok(created) => created,
                Err(e) => {
                    state.results.push(EntryCloneResult {
                        source_id: source_id.clone(),
                        target_id: None,
                        success: false,
                        error: Some(e.to_string()),
                    });
                    return Err(e);
                }
            };

            state.clone_map.insert_entry(&source_id, &created.id);
            if state.cycle_sources.remove(&source_id) {
                state.deferred_targets.push(created.id.clone());
            }
            state.results.push(EntryCloneResult {
                source_id: source_id.clone(),
                target_id: Some(created.id.clone()),
                success: true,
                error: None,
            });
            debug!(source_id = %source_id, target_id = %created.id, "cloned entry");
            Ok(created.id)
        })
    }

    async fn build_clone_fields(
        &self,
        ctx: &CloneContext,
        state: &mut RunState,
        entry: &Entry,
        schema: &Option<ContentTypeSchema>,
    ) -> Result<BTreeMap<FieldId, LocalizedValue>> {
        let mut new_fields: BTreeMap<FieldId, LocalizedValue> = BTreeMap::new();

        for field_id in Self::ordered_fields(schema, entry) {
            let def = schema.as_ref().and_then(|s| s.field(&field_id));

            let Some(localized) = entry.fields.get(&field_id) else {
                // Required fields absent in the source still need a value.
                if let Some(def) = def {
                    if def.required {
                        if let Some(default) = FieldPolicy::default_value_for(def) {
                            new_fields.insert(
                                field_id.clone(),
                                Self::under_locale(&self.options.storage_locale, default),
                            );
                        }
                    }
                }
                continue;
            };

            match self.policy.classify(&entry.content_type, &field_id, localized) {
                FieldKind::EmptyOnClone => {
                    let empty = match def {
                        Some(def) => FieldPolicy::empty_value_for(def.field_type),
                        None => Self::empty_from_shape(localized),
                    };
                    if let Some(empty) = empty {
                        new_fields.insert(
                            field_id.clone(),
                            Self::under_locale(&self.options.storage_locale, empty),
                        );
                    }
                }
                FieldKind::CopyAsIs => {
                    let mut rewritten = LocalizedValue::new();
                    for (locale, value) in localized {
                        self.record_assets(state, value);
                        rewritten.insert(
                            locale.clone(),
                            Self::rewrite_through_map(value, &state.clone_map),
                        );
                    }
                    new_fields.insert(field_id.clone(), rewritten);
                }
                FieldKind::Author => {
                    let mut relinked = LocalizedValue::new();
                    for (locale, value) in localized {
                        let rewritten = self.relink_author_value(ctx, state, &entry.id, value).await;
                        relinked.insert(locale.clone(), rewritten);
                    }
                    new_fields.insert(field_id.clone(), relinked);
                }
                FieldKind::Culture => {
                    new_fields.insert(
                        field_id.clone(),
                        Self::under_locale(
                            &self.options.storage_locale,
                            FieldValue::Text(ctx.target_locale.clone()),
                        ),
                    );
                }
                FieldKind::Markdown => {
                    let translated = self.translate_markdown_value(ctx, localized).await;
                    new_fields.insert(field_id.clone(), translated);
                }
                FieldKind::Translatable => {
                    let translated = self.translate_text_value(ctx, localized).await;
                    new_fields.insert(field_id.clone(), translated);
                }
                FieldKind::Untranslated => {
                    let mut rewritten = LocalizedValue::new();
                    for (locale, value) in localized {
                        let value = self.rewrite_links_cloning(ctx, state, &entry.id, value).await;
                        rewritten.insert(locale.clone(), value);
                    }
                    new_fields.insert(field_id.clone(), rewritten);
                }
            }
        }

        self.apply_prefix(&mut new_fields);
        Ok(new_fields)
    }

    fn under_locale(locale: &str, value: FieldValue) -> LocalizedValue {
        let mut localized = LocalizedValue::new();
        localized.insert(locale.to_string(), value);
        localized
    }

    /// Fallback typed empty when the schema is unavailable: mirror the shape
    /// of the value we are replacing.
    fn empty_from_shape(localized: &LocalizedValue) -> Option<FieldValue> {
        match localized.values().next() {
            Some(FieldValue::Text(_)) => Some(FieldValue::Text(String::new())),
            Some(FieldValue::List(_)) => Some(FieldValue::List(Vec::new())),
            Some(FieldValue::Object(_)) => Some(FieldValue::Object(BTreeMap::new())),
            _ => None,
        }
    }

    fn record_assets(&self, state: &mut RunState, value: &FieldValue) {
        for link in value.links() {
            if link.link_type == LinkKind::Asset {
                state.clone_map.record_asset(&link.id);
            }
        }
    }

    /// Rewrites links through the clone map without cloning anything new.
    /// Unmapped entry links keep their source target.
    pub(crate) fn rewrite_through_map(value: &FieldValue, clone_map: &CloneMap) -> FieldValue {
        value.rewrite_links(&|link| match clone_map.resolve(link) {
            Some(target_id) => Link {
                link_type: link.link_type,
                id: target_id,
            },
            None => link.clone(),
        })
    }

    /// Author links try an existing target-culture author first; only on a
    /// miss does the author entry get cloned like any other reference.
    async fn relink_author_value(
        &self,
        ctx: &CloneContext,
        state: &mut RunState,
        owner: &EntryId,
        value: &FieldValue,
    ) -> FieldValue {
        match value {
            FieldValue::Link(link) => {
                FieldValue::Link(self.relink_author(ctx, state, owner, link).await)
            }
            FieldValue::List(items) => {
                let mut rewritten = Vec::with_capacity(items.len());
                for item in items {
                    rewritten.push(match item {
                        FieldValue::Link(link) => {
                            FieldValue::Link(self.relink_author(ctx, state, owner, link).await)
                        }
                        other => other.clone(),
                    });
                }
                FieldValue::List(rewritten)
            }
            other => other.clone(),
        }
    }

    async fn relink_author(
        &self,
        ctx: &CloneContext,
        state: &mut RunState,
        owner: &EntryId,
        link: &Link,
    ) -> Link {
        if link.link_type == LinkKind::Asset {
            state.clone_map.record_asset(&link.id);
            return link.clone();
        }
        if let Some(target_id) = state.clone_map.entry_target(&link.id) {
            return Link::entry(target_id.clone());
        }
        if state.processing.contains(&link.id) {
            state.cycle_sources.insert(owner.clone());
            return link.clone();
        }

        let author = match self.cms.get_entry(&link.id).await {
            Ok(author) => author,
            Err(e) => {
                warn!(entry_id = %link.id, error = %e, "author fetch failed, keeping source link");
                return link.clone();
            }
        };

        if author.content_type == self.policy.author_content_type {
            if let Some(name) = author.any_text(&self.policy.author_name_field) {
                let query = EntryQuery::by_content_type(&self.policy.author_content_type)
                    .field(&self.policy.author_name_field, name)
                    .field(&self.policy.author_culture_field, &ctx.target_locale)
                    .limit(1);
                match self.cms.find_entries(&query).await {
                    Ok(matches) => {
                        if let Some(existing) = matches.into_iter().next() {
                            debug!(
                                source_author = %link.id,
                                target_author = %existing.id,
                                "re-linked author to existing target-culture entry"
                            );
                            state.clone_map.insert_entry(&link.id, &existing.id);
                            return Link::entry(existing.id);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "author lookup failed, falling through to clone");
                    }
                }
            }
        }

        match self.clone_recursive(ctx, state, link.id.clone()).await {
            Ok(target_id) => Link::entry(target_id),
            Err(e) => {
                warn!(entry_id = %link.id, error = %e, "author clone failed, keeping source link");
                link.clone()
            }
        }
    }

    /// Walks a link-bearing value, cloning referenced entries depth-first
    /// and rewriting to target ids. Links on the processing stack (a cycle)
    /// are emitted unchanged; the idempotent memo makes a later pass safe.
    fn rewrite_links_cloning<'a>(
        &'a self,
        ctx: &'a CloneContext,
        state: &'a mut RunState,
        owner: &'a EntryId,
        value: &'a FieldValue,
    ) -> BoxFuture<'a, FieldValue> {
        Box::pin(async move {
            match value {
                FieldValue::Link(link) => match link.link_type {
                    LinkKind::Asset => {
                        state.clone_map.record_asset(&link.id);
                        value.clone()
                    }
                    LinkKind::Entry => {
                        if state.processing.contains(&link.id) {
                            state.cycle_sources.insert(owner.clone());
                            return value.clone();
                        }
                        match self.clone_recursive(ctx, state, link.id.clone()).await {
                            Ok(target_id) => FieldValue::Link(Link::entry(target_id)),
                            Err(e) => {
                                warn!(
                                    entry_id = %link.id,
                                    error = %e,
                                    "reference clone failed, keeping source link"
                                );
                                value.clone()
                            }
                        }
                    }
                },
                FieldValue::List(items) => {
                    let mut rewritten = Vec::with_capacity(items.len());
                    for item in items {
                        rewritten.push(self.rewrite_links_cloning(ctx, state, owner, item).await);
                    }
                    FieldValue::List(rewritten)
                }
                FieldValue::Object(map) => {
                    let mut rewritten = BTreeMap::new();
                    for (key, item) in map {
                        rewritten.insert(
                            key.clone(),
                            self.rewrite_links_cloning(ctx, state, owner, item).await,
                        );
                    }
                    FieldValue::Object(rewritten)
                }
                other => other.clone(),
            }
        })
    }

    pub(crate) async fn translate_text_value(
        &self,
        ctx: &CloneContext,
        localized: &LocalizedValue,
    ) -> LocalizedValue {
        let mut translated = LocalizedValue::new();
        for (locale, value) in localized {
            let value = match value {
                FieldValue::Text(text) => FieldValue::Text(
                    translate_field_text(
                        self.translator.as_ref(),
                        &self.policy,
                        text,
                        &ctx.translation.source_language,
                        &ctx.translation.target_language,
                    )
                    .await,
                ),
                other => other.clone(),
            };
            translated.insert(locale.clone(), value);
        }
        translated
    }

    /// Markdown values go through the image-safe path; bullet-list arrays
    /// are translated element-wise.
    pub(crate) async fn translate_markdown_value(
        &self,
        ctx: &CloneContext,
        localized: &LocalizedValue,
    ) -> LocalizedValue {
        let mut translated = LocalizedValue::new();
        for (locale, value) in localized {
            let value = match value {
                FieldValue::Text(text) => FieldValue::Text(
                    locsync_translate::markdown::translate_markdown(
                        self.translator.as_ref(),
                        text,
                        &ctx.translation.source_language,
                        &ctx.translation.target_language,
                    )
                    .await,
                ),
                FieldValue::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(match item {
                            FieldValue::Text(text) => FieldValue::Text(
                                locsync_translate::markdown::translate_markdown(
                                    self.translator.as_ref(),
                                    text,
                                    &ctx.translation.source_language,
                                    &ctx.translation.target_language,
                                )
                                .await,
                            ),
                            other => other.clone(),
                        });
                    }
                    FieldValue::List(out)
                }
                other => other.clone(),
            };
            translated.insert(locale.clone(), value);
        }
        translated
    }

    /// Second pass over clones that carried an unresolved cycle link: every
    /// counterpart exists by now, so the source links they kept can be
    /// rewritten through the finished clone map.
    async fn repair_cycle_links(&self, state: &mut RunState) {
        let deferred = std::mem::take(&mut state.deferred_targets);
        for target_id in deferred {
            let mut target = match self.cms.get_entry(&target_id).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(target_id = %target_id, error = %e, "cycle repair fetch failed");
                    continue;
                }
            };
            for localized in target.fields.values_mut() {
                for value in localized.values_mut() {
                    *value = Self::rewrite_through_map(value, &state.clone_map);
                }
            }
            if let Err(e) = self.cms.update_entry(&target).await {
                warn!(target_id = %target_id, error = %e, "cycle repair update failed");
            }
        }
    }

    /// Applied after translation so the prefix itself never reaches the
    /// provider.
    fn apply_prefix(&self, fields: &mut BTreeMap<FieldId, LocalizedValue>) {
        for field_id in &self.policy.prefix_fields {
            if let Some(localized) = fields.get_mut(field_id) {
                for value in localized.values_mut() {
                    if let FieldValue::Text(text) = value {
                        if !text.trim().is_empty() && !text.starts_with(&self.policy.clone_prefix) {
                            *text = format!("{}{}", self.policy.clone_prefix, text);
                        }
                    }
                }
            }
        }
    }
}
