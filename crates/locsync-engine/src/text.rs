//! Best-effort plain-text translation. The clone prefix is detached before
//! the provider call and re-prepended verbatim, and every failure falls
//! back to the source text.

use tracing::warn;

use locsync_core::{FieldPolicy, TranslateOptions, Translator};

pub async fn translate_field_text(
    translator: &dyn Translator,
    policy: &FieldPolicy,
    text: &str,
    source_lang: &str,
    target_lang: &str,
) -> String {
    let non_space = text.chars().filter(|c| !c.is_whitespace()).count();
    if non_space < 2 {
        return text.to_string();
    }

    let (prefix, body) = match text.strip_prefix(&policy.clone_prefix) {
        Some(rest) if !policy.clone_prefix.is_empty() => (policy.clone_prefix.as_str(), rest),
        _ => ("", text),
    };

    match translator
        .translate(body, source_lang, target_lang, &TranslateOptions::formatted())
        .await
    {
        Ok(translated) => format!("{prefix}{translated}"),
        Err(e) => {
            warn!(error = %e, "translation failed, keeping source text");
            text.to_string()
        }
    }
}
