//! Entity identifier normalization
//!
//! Snapshot records and merged-ID reference files carry identifiers either
//! bare (`W42`) or as full canonical URIs. Storage always uses the bare
//! form, so both pipelines normalize through here.

/// Canonical URI prefix stripped from every identifier before storage
pub const ID_PREFIX: &str = "https://openalex.org/";

/// Strip the canonical URI prefix; blank identifiers collapse to None
pub fn normalize_id(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(raw.strip_prefix(ID_PREFIX).unwrap_or(raw).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_prefix() {
        assert_eq!(
            normalize_id(Some("https://openalex.org/W42")),
            Some("W42".to_string())
        );
    }

    #[test]
    fn test_bare_id_passes_through() {
        assert_eq!(normalize_id(Some("  W42 ")), Some("W42".to_string()));
    }

    #[test]
    fn test_blank_collapses_to_none() {
        assert_eq!(normalize_id(Some("")), None);
        assert_eq!(normalize_id(Some("   ")), None);
        assert_eq!(normalize_id(None), None);
    }
}
