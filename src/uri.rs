//! URI helpers.
//!
//! Every identity the engine records is an absolute [`Url`] that always
//! carries a fragment (possibly empty), so `urn:x`, `urn:x#` and the result of
//! joining `#` onto `urn:x` all compare equal once normalized here.

use url::Url;

use crate::error::DerefError;

/// Parse an absolute URI and normalize it to carry a fragment.
pub fn parse(uri: &str) -> Result<Url, DerefError> {
    let mut url = Url::parse(uri).map_err(|e| DerefError::InvalidUri {
        uri: uri.to_string(),
        message: e.to_string(),
    })?;
    if url.fragment().is_none() {
        url.set_fragment(Some(""));
    }
    Ok(url)
}

/// Resolve `reference` against `base` (RFC 3986 reference resolution).
pub fn resolve(base: &Url, reference: &str) -> Result<Url, DerefError> {
    let mut url = base.join(reference).map_err(|e| DerefError::InvalidUri {
        uri: reference.to_string(),
        message: format!("cannot resolve against {base}: {e}"),
    })?;
    if url.fragment().is_none() {
        url.set_fragment(Some(""));
    }
    Ok(url)
}

/// The document part of a URI (fragment removed).
pub fn strip_fragment(url: &Url) -> Url {
    let mut bare = url.clone();
    bare.set_fragment(None);
    bare
}

/// True when the fragment is a JSON Pointer (empty or `/`-prefixed) rather
/// than a named anchor.
pub fn is_pointer_fragment(fragment: &str) -> bool {
    fragment.is_empty() || fragment.starts_with('/')
}

/// `base` with its fragment replaced by a JSON Pointer or anchor name.
pub fn with_fragment(base: &Url, fragment: &str) -> Url {
    let mut url = base.clone();
    url.set_fragment(Some(fragment));
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_adds_empty_fragment() {
        assert_eq!(parse("urn:x").unwrap().as_str(), "urn:x#");
        assert_eq!(parse("urn:x#").unwrap(), parse("urn:x").unwrap());
    }

    #[test]
    fn resolve_fragment_against_urn() {
        let base = parse("urn:x").unwrap();
        let url = resolve(&base, "#/definitions/self").unwrap();
        assert_eq!(url.as_str(), "urn:x#/definitions/self");
    }

    #[test]
    fn resolve_relative_path() {
        let base = parse("https://example.com/schemas/root.json").unwrap();
        let url = resolve(&base, "types/buyer.json#/$defs/a").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/schemas/types/buyer.json#/$defs/a"
        );
    }

    #[test]
    fn resolve_relative_path_against_urn_fails() {
        let base = parse("urn:x").unwrap();
        assert!(matches!(
            resolve(&base, "other.json"),
            Err(DerefError::InvalidUri { .. })
        ));
    }

    #[test]
    fn pointer_text_matches_joined_reference() {
        let base = parse("urn:x").unwrap();
        let joined = resolve(&base, "#/definitions/a b").unwrap();
        assert_eq!(with_fragment(&base, "/definitions/a b"), joined);
    }

    #[test]
    fn pointer_vs_anchor_fragment() {
        assert!(is_pointer_fragment(""));
        assert!(is_pointer_fragment("/$defs/a"));
        assert!(!is_pointer_fragment("node"));
    }

    #[test]
    fn strip_fragment_keeps_document() {
        let url = parse("urn:other#/defs/a").unwrap();
        assert_eq!(strip_fragment(&url).as_str(), "urn:other");
    }
}
