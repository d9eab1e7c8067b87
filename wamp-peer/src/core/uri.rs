use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Error for an invalid URI.
#[derive(Debug, Error)]
#[error("invalid URI: {0}")]
pub struct InvalidUri(String);

impl InvalidUri {
    pub fn uri(&self) -> &str {
        &self.0
    }
}

fn validate(re: &Regex, uri: &str) -> Result<(), InvalidUri> {
    if !re.is_match(uri) {
        return Err(InvalidUri(uri.to_owned()));
    }
    Ok(())
}

/// Validates a concrete URI: dot-separated components that are non-empty and hold no whitespace,
/// `.`, or `#`.
///
/// Used for realms, published topics, called procedures, and close reasons.
pub fn validate_uri<S>(uri: S) -> Result<(), InvalidUri>
where
    S: AsRef<str>,
{
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([^\s\.#]+\.)*([^\s\.#]+)$").unwrap());
    validate(&RE, uri.as_ref())
}

/// Validates a URI pattern, where empty components act as wildcards.
///
/// Used for subscriptions and registrations with a non-exact match policy.
pub fn validate_wildcard_uri<S>(uri: S) -> Result<(), InvalidUri>
where
    S: AsRef<str>,
{
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([^\s\.#]*\.)*([^\s\.#]*)$").unwrap());
    validate(&RE, uri.as_ref())
}

#[cfg(test)]
mod uri_test {
    use assert_matches::assert_matches;

    use crate::core::uri::{
        validate_uri,
        validate_wildcard_uri,
    };

    #[test]
    fn validates_concrete_uris() {
        assert_matches!(validate_uri("com"), Ok(()));
        assert_matches!(validate_uri("com.example.Topic"), Ok(()));
        assert_matches!(validate_uri("com.example.topic-1"), Ok(()));
        assert_matches!(validate_uri("com..topic"), Err(_));
        assert_matches!(validate_uri("com.example topic"), Err(_));
        assert_matches!(validate_uri("com.example#"), Err(_));
        assert_matches!(validate_uri(""), Err(_));
        assert_matches!(validate_uri("."), Err(_));
    }

    #[test]
    fn validates_wildcard_uris() {
        assert_matches!(validate_wildcard_uri("com..topic"), Ok(()));
        assert_matches!(validate_wildcard_uri(".."), Ok(()));
        assert_matches!(validate_wildcard_uri("com.a b"), Err(_));
        assert_matches!(validate_wildcard_uri("com.example#"), Err(_));
    }

    #[test]
    fn reports_rejected_uri() {
        assert_matches!(validate_uri("a..b"), Err(err) => {
            assert_eq!(err.uri(), "a..b");
            assert_eq!(err.to_string(), "invalid URI: a..b");
        });
    }
}
