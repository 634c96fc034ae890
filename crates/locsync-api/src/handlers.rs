use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use locsync_core::{
    CloneMap, CloneOutcome, EntryBackup, Relationship, SyncStatus, Translator, TranslatorUsage,
};
use locsync_engine::{CloneRequest, UpdateOptions};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: option_env!("CARGO_PKG_VERSION").unwrap_or("0.1.0").to_string(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatorStatusResponse {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TranslatorUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn deepl_status(State(state): State<AppState>) -> Json<TranslatorStatusResponse> {
    match state.translator.usage().await {
        Ok(usage) => Json(TranslatorStatusResponse {
            reachable: true,
            usage: Some(usage),
            error: None,
        }),
        Err(e) => Json(TranslatorStatusResponse {
            reachable: false,
            usage: None,
            error: Some(e.to_string()),
        }),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneRequestBody {
    pub source_entry_id: String,
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub target_languages: Option<Vec<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCloneResult {
    pub target_language: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CloneOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneResponseBody {
    pub original_entry_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloned_entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_mapping: Option<CloneMap>,
    pub all_results: Vec<TargetCloneResult>,
    pub target_locales: Vec<String>,
}

/// One clone run per requested target language. A failing target does not
/// abort the others.
pub async fn clone_entry(
    State(state): State<AppState>,
    Json(body): Json<CloneRequestBody>,
) -> ApiResult<Json<CloneResponseBody>> {
    let targets: Vec<String> = match (&body.target_languages, &body.target_language) {
        (Some(languages), _) if !languages.is_empty() => languages.clone(),
        (_, Some(language)) => vec![language.clone()],
        _ => {
            return Err(ApiError::BadRequest(
                "targetLanguage or targetLanguages is required".into(),
            ))
        }
    };

    let (engine, _store) = state.engine_for(body.space_id.as_deref(), body.environment_id.as_deref());
    let cancel = state.shutdown.child_token();

    let mut all_results = Vec::with_capacity(targets.len());
    let mut target_locales = Vec::new();
    let mut first_error: Option<ApiError> = None;

    for target_language in &targets {
        let request = CloneRequest {
            source_entry_id: body.source_entry_id.clone(),
            source_language: body.source_language.clone(),
            target_language: target_language.clone(),
        };
        match engine.clone_entry(&request, &cancel).await {
            Ok(outcome) => {
                info!(
                    source_id = %body.source_entry_id,
                    cloned_id = %outcome.cloned_entry_id,
                    target_language,
                    "clone completed"
                );
                target_locales.push(outcome.target_locale.clone());
                all_results.push(TargetCloneResult {
                    target_language: target_language.clone(),
                    success: true,
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Err(e) => {
                let message = e.to_string();
                if first_error.is_none() {
                    first_error = Some(ApiError::Core(e));
                }
                all_results.push(TargetCloneResult {
                    target_language: target_language.clone(),
                    success: false,
                    outcome: None,
                    error: Some(message),
                });
            }
        }
    }

    let first_success = all_results.iter().find_map(|r| r.outcome.as_ref());
    if first_success.is_none() {
        if let Some(error) = first_error {
            return Err(error);
        }
    }
    let cloned_entry_id = first_success.map(|o| o.cloned_entry_id.clone());
    let clone_mapping = first_success.map(|o| o.clone_mapping.clone());

    Ok(Json(CloneResponseBody {
        original_entry_id: body.source_entry_id,
        cloned_entry_id,
        clone_mapping,
        all_results,
        target_locales,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub entry_id: String,
    pub target_language: String,
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default)]
    pub environment_id: Option<String>,
}

/// Resolves the relationship by (source entry, target language) and runs
/// the read-only status check.
pub async fn incremental_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<SyncStatus>> {
    let (engine, store) =
        state.engine_for(query.space_id.as_deref(), query.environment_id.as_deref());

    let relationships = store.list_by_source(&query.entry_id).await?;
    let Some(relationship) = relationships.into_iter().find(|r| {
        r.translation_context
            .target_language
            .eq_ignore_ascii_case(&query.target_language)
    }) else {
        return Ok(Json(SyncStatus::no_relationship()));
    };

    let status = engine
        .status(&relationship.source_entry_id, &relationship.target_entry_id)
        .await?;
    Ok(Json(status))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptionsBody {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub auto_translate_new_references: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequestBody {
    pub source_entry_id: String,
    pub target_entry_id: String,
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub options: Option<UpdateOptionsBody>,
}

pub async fn incremental_update(
    State(state): State<AppState>,
    Json(body): Json<UpdateRequestBody>,
) -> ApiResult<Json<locsync_core::UpdateOutcome>> {
    let relationship_id =
        locsync_core::relationship_id(&body.source_entry_id, &body.target_entry_id);
    let _guard = state.single_flight.acquire(&relationship_id).await;

    let (engine, _store) = state.engine_for(body.space_id.as_deref(), body.environment_id.as_deref());
    let options = body.options.unwrap_or_default();
    let outcome = engine
        .update(
            &body.source_entry_id,
            &body.target_entry_id,
            &UpdateOptions {
                reason: options.reason,
                auto_translate_new_references: options.auto_translate_new_references,
            },
            &state.shutdown.child_token(),
        )
        .await;
    Ok(Json(outcome))
}

pub async fn list_relationships(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> ApiResult<Json<Vec<Relationship>>> {
    let store = state.store_for(state.scoped_cms(None, None));
    Ok(Json(store.list_by_source(&entry_id).await?))
}

pub async fn list_backups(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> ApiResult<Json<Vec<EntryBackup>>> {
    let store = state.store_for(state.scoped_cms(None, None));
    Ok(Json(store.list_backups(&entry_id).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepReferenceStats {
    pub exists: bool,
    pub source_entry_id: String,
    pub target_entry_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scanned: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_count: Option<usize>,
}

impl DeepReferenceStats {
    fn from_tree(
        source_id: String,
        target_id: String,
        tree: Option<locsync_core::ReferenceTree>,
    ) -> Self {
        match tree {
            Some(tree) => DeepReferenceStats {
                exists: true,
                source_entry_id: source_id,
                target_entry_id: target_id,
                max_depth: Some(tree.max_depth),
                last_scanned: Some(tree.last_scanned),
                node_count: Some(tree.node_count()),
                reference_count: Some(tree.flattened_refs.len()),
            },
            None => DeepReferenceStats {
                exists: false,
                source_entry_id: source_id,
                target_entry_id: target_id,
                max_depth: None,
                last_scanned: None,
                node_count: None,
                reference_count: None,
            },
        }
    }
}

pub async fn deep_reference_stats(
    State(state): State<AppState>,
    Path((source_id, target_id)): Path<(String, String)>,
) -> ApiResult<Json<DeepReferenceStats>> {
    let store = state.store_for(state.scoped_cms(None, None));
    let tree = store.get_deep_map(&source_id, &target_id).await?;
    Ok(Json(DeepReferenceStats::from_tree(source_id, target_id, tree)))
}

pub async fn rebuild_deep_references(
    State(state): State<AppState>,
    Path((source_id, target_id)): Path<(String, String)>,
) -> ApiResult<Json<DeepReferenceStats>> {
    let (engine, _store) = state.engine_for(None, None);
    let tree = engine.rebuild_deep_references(&source_id, &target_id).await?;
    Ok(Json(DeepReferenceStats::from_tree(
        source_id,
        target_id,
        Some(tree),
    )))
}
