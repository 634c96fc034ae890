//! Markdown-safe translation. Image blocks are swapped for placeholder
//! tokens before the body goes to the provider, captions are translated
//! one by one, and the original URLs are restored byte-for-byte.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use locsync_core::{TranslateOptions, Translator};

fn image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").expect("valid image regex"))
}

fn placeholder(index: usize) -> String {
    format!("%%IMAGE_PLACEHOLDER_{index}%%")
}

struct ImageBlock {
    original: String,
    caption: String,
    url: String,
}

/// Translates a markdown document, best effort. Any provider failure leaves
/// the affected part in the source language; image URLs are never touched.
pub async fn translate_markdown(
    translator: &dyn Translator,
    markdown: &str,
    source_lang: &str,
    target_lang: &str,
) -> String {
    let re = image_regex();

    let mut blocks = Vec::new();
    let mut body = String::with_capacity(markdown.len());
    let mut last = 0;
    for captures in re.captures_iter(markdown) {
        let whole = captures.get(0).expect("group 0 always present");
        body.push_str(&markdown[last..whole.start()]);
        body.push_str(&placeholder(blocks.len()));
        last = whole.end();
        blocks.push(ImageBlock {
            original: whole.as_str().to_string(),
            caption: captures[1].to_string(),
            url: captures[2].to_string(),
        });
    }
    body.push_str(&markdown[last..]);

    let mut translated_body = match translator
        .translate(&body, source_lang, target_lang, &TranslateOptions::markdown())
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "markdown body translation failed, keeping source text");
            body.clone()
        }
    };

    // A provider that mangles placeholders would drop images; fall back to
    // the untranslated body so every image survives.
    if blocks
        .iter()
        .enumerate()
        .any(|(i, _)| !translated_body.contains(&placeholder(i)))
    {
        warn!("translated markdown lost an image placeholder, keeping source body");
        translated_body = body.clone();
    }

    for (index, block) in blocks.iter().enumerate() {
        let replacement = if block.caption.trim().is_empty() {
            block.original.clone()
        } else {
            match translator
                .translate(
                    &block.caption,
                    source_lang,
                    target_lang,
                    &TranslateOptions::formatted(),
                )
                .await
            {
                Ok(caption) => format!("![{}]({})", caption, block.url),
                Err(e) => {
                    warn!(error = %e, "caption translation failed, keeping original image block");
                    block.original.clone()
                }
            }
        };
        translated_body = translated_body.replace(&placeholder(index), &replacement);
    }

    translated_body
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use locsync_core::{LanguageInfo, LocSyncError, Result, TranslatorUsage};

    /// Wraps text in a target-language marker, leaving substrings intact.
    struct EchoTranslator;

    #[async_trait]
    impl Translator for EchoTranslator {
        async fn translate(
            &self,
            text: &str,
            _source_lang: &str,
            target_lang: &str,
            _options: &TranslateOptions,
        ) -> Result<String> {
            Ok(format!("{target_lang}::{text}"))
        }

        async fn usage(&self) -> Result<TranslatorUsage> {
            Ok(TranslatorUsage::default())
        }

        async fn source_languages(&self) -> Result<Vec<LanguageInfo>> {
            Ok(Vec::new())
        }

        async fn target_languages(&self) -> Result<Vec<LanguageInfo>> {
            Ok(Vec::new())
        }
    }

    struct BrokenTranslator;

    #[async_trait]
    impl Translator for BrokenTranslator {
        async fn translate(
            &self,
            _text: &str,
            _source_lang: &str,
            _target_lang: &str,
            _options: &TranslateOptions,
        ) -> Result<String> {
            Err(LocSyncError::Translator("offline".into()))
        }

        async fn usage(&self) -> Result<TranslatorUsage> {
            Err(LocSyncError::Translator("offline".into()))
        }

        async fn source_languages(&self) -> Result<Vec<LanguageInfo>> {
            Err(LocSyncError::Translator("offline".into()))
        }

        async fn target_languages(&self) -> Result<Vec<LanguageInfo>> {
            Err(LocSyncError::Translator("offline".into()))
        }
    }

    #[tokio::test]
    async fn urls_survive_and_captions_translate() {
        let md = "## Hallo\n\n![Bild](https://cdn/a.jpg)\n\nMehr Text";
        let out = translate_markdown(&EchoTranslator, md, "DE", "IT").await;
        assert!(out.contains("![IT::Bild](https://cdn/a.jpg)"));
        assert!(out.contains("## Hallo"));
        assert!(out.starts_with("IT::"));
        assert!(!out.contains("IMAGE_PLACEHOLDER"));
    }

    #[tokio::test]
    async fn empty_caption_keeps_block_verbatim() {
        let md = "![](https://cdn/b.png)";
        let out = translate_markdown(&EchoTranslator, md, "DE", "IT").await;
        assert!(out.contains("![](https://cdn/b.png)"));
    }

    #[tokio::test]
    async fn translator_outage_returns_source_markdown() {
        let md = "## Hallo\n\n![Bild](https://cdn/a.jpg)";
        let out = translate_markdown(&BrokenTranslator, md, "DE", "IT").await;
        assert_eq!(out, md);
    }

    #[tokio::test]
    async fn multiple_images_round_trip_in_order() {
        let md = "![eins](https://cdn/1.jpg) und ![zwei](https://cdn/2.jpg)";
        let out = translate_markdown(&EchoTranslator, md, "DE", "IT").await;
        assert!(out.contains("![IT::eins](https://cdn/1.jpg)"));
        assert!(out.contains("![IT::zwei](https://cdn/2.jpg)"));
        let first = out.find("https://cdn/1.jpg").unwrap();
        let second = out.find("https://cdn/2.jpg").unwrap();
        assert!(first < second);
    }
}
