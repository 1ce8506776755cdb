//! Input validation shared by both processes.
//!
//! Every identifier that ends up in a filesystem path, container name, or
//! SQL row is validated here *before* any I/O happens. The patterns are
//! deliberately strict: lowercase DNS labels for hostnames, uppercase
//! underscore names for secret files, and a conservative display-name set.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static HOSTNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]{1,64}$").unwrap());

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 _.-]{1,128}$").unwrap());

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]{1,64}$").unwrap());

static SECRET_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9_]{1,64}$").unwrap());

/// Lowercase DNS label: 1–64 chars of `[a-z0-9-]`.
///
/// The hostname names a bot in routes, container names, and two directory
/// trees, so a traversal attempt must die here.
pub fn hostname(value: &str) -> Result<()> {
    if HOSTNAME_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "invalid hostname {value:?}: must be 1-64 chars of [a-z0-9-]"
        )))
    }
}

/// Display name: 1–128 chars of `[A-Za-z0-9 _.-]`.
pub fn display_name(value: &str) -> Result<()> {
    if NAME_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "invalid name {value:?}: must be 1-128 chars of [A-Za-z0-9 _.-]"
        )))
    }
}

/// Provider-scoped model string: ≤128 chars, no `..`, no path separators.
pub fn model(value: &str) -> Result<()> {
    if value.is_empty() || value.len() > 128 {
        return Err(Error::Validation(
            "model must be 1-128 characters".into(),
        ));
    }
    if value.contains("..") || value.contains('\\') || value.contains('\0') {
        return Err(Error::Validation(format!(
            "invalid model {value:?}"
        )));
    }
    Ok(())
}

/// A single routing tag: lowercase `[a-z0-9-]`.
pub fn tag(value: &str) -> Result<()> {
    if TAG_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "invalid tag {value:?}: must be lowercase [a-z0-9-]"
        )))
    }
}

/// Secret file name: uppercase underscore-only, within 64 chars.
pub fn secret_name(value: &str) -> Result<()> {
    if SECRET_NAME_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "invalid secret name {value:?}: must be 1-64 chars of [A-Z0-9_]"
        )))
    }
}

/// Normalize a tag list: validate each tag, drop duplicates preserving
/// order, and collapse an empty list to `None`.
pub fn normalize_tags(tags: Option<Vec<String>>) -> Result<Option<Vec<String>>> {
    let Some(tags) = tags else { return Ok(None) };
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(tags.len());
    for t in tags {
        tag(&t)?;
        if seen.insert(t.clone()) {
            out.push(t);
        }
    }
    Ok(if out.is_empty() { None } else { Some(out) })
}

/// Derive the secret file name for a channel token, e.g.
/// `telegram` → `TELEGRAM_TOKEN`.
pub fn channel_token_name(channel_type: &str) -> String {
    format!("{}_TOKEN", channel_type.to_ascii_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_accepts_dns_labels() {
        assert!(hostname("my-bot").is_ok());
        assert!(hostname("a").is_ok());
        assert!(hostname(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn hostname_rejects_traversal_and_case() {
        assert!(hostname("").is_err());
        assert!(hostname("My-Bot").is_err());
        assert!(hostname("../etc").is_err());
        assert!(hostname("a/b").is_err());
        assert!(hostname("a.b").is_err());
        assert!(hostname(&"x".repeat(65)).is_err());
    }

    #[test]
    fn model_rejects_dotdot() {
        assert!(model("gpt-4.1").is_ok());
        assert!(model("claude-sonnet-4-20250514").is_ok());
        assert!(model("../../etc/passwd").is_err());
        assert!(model("").is_err());
        assert!(model(&"m".repeat(129)).is_err());
    }

    #[test]
    fn secret_name_is_uppercase_underscore_only() {
        assert!(secret_name("TELEGRAM_TOKEN").is_ok());
        assert!(secret_name("telegram_token").is_err());
        assert!(secret_name("A B").is_err());
        assert!(secret_name("../X").is_err());
    }

    #[test]
    fn normalize_tags_dedupes_preserving_order() {
        let tags = Some(vec!["prod".into(), "dev".into(), "prod".into()]);
        let out = normalize_tags(tags).unwrap();
        assert_eq!(out, Some(vec!["prod".to_string(), "dev".to_string()]));
    }

    #[test]
    fn normalize_tags_collapses_empty_to_none() {
        assert_eq!(normalize_tags(Some(vec![])).unwrap(), None);
        assert_eq!(normalize_tags(None).unwrap(), None);
    }

    #[test]
    fn normalize_tags_rejects_invalid_entries() {
        assert!(normalize_tags(Some(vec!["PROD".into()])).is_err());
    }

    #[test]
    fn channel_token_name_uppercases() {
        assert_eq!(channel_token_name("telegram"), "TELEGRAM_TOKEN");
        assert_eq!(channel_token_name("whatsapp"), "WHATSAPP_TOKEN");
    }
}
