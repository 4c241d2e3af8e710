//! Generated-text sanitisation and payload validation.
//!
//! Text generation itself is an external collaborator behind
//! [`TextGenerator`]. What comes back is run through [`sanitize`], which
//! drops lines matching an explicit list of leakage predicates, before it
//! becomes a draft. [`validate`] checks a payload against its kind and
//! destination before anything is stored.

use std::future::Future;
use std::pin::Pin;

use crate::models::item::{ContentKind, Destination, Payload};
use crate::{AppError, Result};

/// Maximum characters in a post or quote comment, after trimming.
pub const MAX_TEXT_CHARS: usize = 280;
/// Maximum images attached to one post.
pub const MAX_IMAGES: usize = 4;
/// Maximum images the direct executor can attach; its command has one `image_url`.
pub const MAX_DIRECT_IMAGES: usize = 1;
/// Media file extensions accepted in `image_refs`, lowercase.
pub const MEDIA_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "mp4"];

/// External text generation service.
pub trait TextGenerator: Send + Sync {
    /// Produce raw text for `prompt`.
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// A named rule identifying a line that must not reach a post.
pub struct LeakPredicate {
    /// Rule name, for diagnostics.
    pub name: &'static str,
    /// Returns `true` for lines to drop. Receives the trimmed line.
    pub matches: fn(&str) -> bool,
}

const INSTRUCTION_PREFIXES: &[&str] = &[
    "prompt:",
    "note:",
    "instruction:",
    "instructions:",
    "output:",
    "response:",
    "プロンプト",
    "注意",
    "指示",
    "出力",
];

const PROFILE_LABELS: &[&str] = &[
    "name:",
    "age:",
    "personality:",
    "tone:",
    "speech style:",
    "background:",
    "名前",
    "年齢",
    "性格",
    "口調",
    "背景",
    "キャラクター",
];

fn is_heading(line: &str) -> bool {
    line.starts_with('#')
}

fn starts_with_label(line: &str, labels: &[&str]) -> bool {
    let lower = line.to_lowercase();
    labels.iter().any(|label| {
        if label.is_ascii() {
            lower.starts_with(label)
        } else {
            lower
                .strip_prefix(label)
                .is_some_and(|rest| rest.starts_with([':', '：']))
        }
    })
}

fn is_instruction_echo(line: &str) -> bool {
    starts_with_label(line, INSTRUCTION_PREFIXES)
}

fn is_profile_label(line: &str) -> bool {
    starts_with_label(line, PROFILE_LABELS)
}

fn is_separator(line: &str) -> bool {
    line.chars().count() >= 3
        && line
            .chars()
            .all(|c| matches!(c, '-' | '=' | '_' | '*' | '─' | '━' | '～' | '~'))
}

/// Lines matching any of these are removed by [`sanitize`].
pub const LEAK_PREDICATES: &[LeakPredicate] = &[
    LeakPredicate {
        name: "markdown_heading",
        matches: is_heading,
    },
    LeakPredicate {
        name: "instruction_echo",
        matches: is_instruction_echo,
    },
    LeakPredicate {
        name: "profile_label",
        matches: is_profile_label,
    },
    LeakPredicate {
        name: "separator_rule",
        matches: is_separator,
    },
];

const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('“', '”'),
    ('「', '」'),
    ('『', '』'),
];

fn strip_wrapping_quotes(text: &str) -> &str {
    let mut current = text.trim();
    loop {
        let stripped = QUOTE_PAIRS.iter().find_map(|(open, close)| {
            current
                .strip_prefix(*open)
                .and_then(|rest| rest.strip_suffix(*close))
                .filter(|inner| !inner.contains(*open) && !inner.contains(*close))
        });
        match stripped {
            Some(inner) if !inner.trim().is_empty() => current = inner.trim(),
            _ => return current,
        }
    }
}

/// Remove prompt leakage from generated text.
///
/// Drops every line matched by [`LEAK_PREDICATES`], joins the remainder,
/// strips wrapping quotes, and trims surrounding whitespace.
#[must_use]
pub fn sanitize(text: &str) -> String {
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !LEAK_PREDICATES.iter().any(|p| (p.matches)(trimmed))
        })
        .collect();
    strip_wrapping_quotes(kept.join("\n").trim()).to_owned()
}

fn check_length(field: &str, text: &str) -> Result<()> {
    let count = text.trim().chars().count();
    if count > MAX_TEXT_CHARS {
        return Err(AppError::Validation(format!(
            "{field} has {count} characters, limit is {MAX_TEXT_CHARS}"
        )));
    }
    Ok(())
}

/// Whether `reference` names a file with an accepted media extension.
///
/// Query strings and fragments are ignored, so signed URLs pass.
#[must_use]
pub fn has_media_extension(reference: &str) -> bool {
    let path = reference
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    let file = path.rsplit('/').next().unwrap_or_default();
    file.rsplit_once('.').is_some_and(|(stem, ext)| {
        !stem.is_empty() && MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    })
}

/// Whether the direct executor can carry `payload` without dropping media.
#[must_use]
pub fn fits_direct_api(payload: &Payload) -> bool {
    match payload {
        Payload::Post { image_refs, .. } => image_refs.len() <= MAX_DIRECT_IMAGES,
        Payload::Repost { .. } => true,
    }
}

/// Validate a payload against its kind and destination.
///
/// # Errors
///
/// Returns `AppError::Validation` describing the first violated rule.
pub fn validate(kind: ContentKind, payload: &Payload, destination: Destination) -> Result<()> {
    if payload.is_empty() {
        return Err(AppError::Validation("payload is empty".into()));
    }

    match (kind, payload) {
        (ContentKind::Post, Payload::Post { text, image_refs }) => {
            check_length("text", text)?;
            if image_refs.len() > MAX_IMAGES {
                return Err(AppError::Validation(format!(
                    "{} images attached, limit is {MAX_IMAGES}",
                    image_refs.len()
                )));
            }
            if image_refs.iter().any(|r| r.trim().is_empty()) {
                return Err(AppError::Validation("image reference is empty".into()));
            }
            if let Some(bad) = image_refs.iter().find(|r| !has_media_extension(r)) {
                return Err(AppError::Validation(format!(
                    "unsupported media type for {bad}; expected one of {}",
                    MEDIA_EXTENSIONS.join(", ")
                )));
            }
        }
        (ContentKind::Retweet, Payload::Repost { .. }) => {
            if payload.comment().is_some() {
                return Err(AppError::Validation(
                    "retweets cannot carry a comment; use quote_retweet".into(),
                ));
            }
        }
        (ContentKind::QuoteRetweet, Payload::Repost { .. }) => {
            let comment = payload.comment().ok_or_else(|| {
                AppError::Validation("quote retweets need a non-empty comment".into())
            })?;
            check_length("comment", comment)?;
        }
        _ => {
            return Err(AppError::Validation(format!(
                "payload does not match kind {}",
                kind.as_str()
            )));
        }
    }

    if destination == Destination::DirectApi && !fits_direct_api(payload) {
        return Err(AppError::Validation(format!(
            "direct_api destination carries at most {MAX_DIRECT_IMAGES} image; use relay"
        )));
    }

    if destination == Destination::Webhook && !kind.is_repost() {
        return Err(AppError::Validation(
            "webhook destination only accepts retweets and quote retweets".into(),
        ));
    }

    Ok(())
}
