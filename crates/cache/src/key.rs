use serde::Serialize;
use sha2::{Digest, Sha256};

/// Stable key derived from a function identity and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash `function` together with the canonical JSON form of `args`.
    /// Object keys serialize in sorted order, so argument maps built in any
    /// order produce the same key.
    pub fn new<A: Serialize + ?Sized>(function: &str, args: &A) -> Self {
        let canonical = serde_json::to_value(args)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(function.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ignores_argument_map_order() {
        let a = CacheKey::new("tmdb.discover", &json!({"year": 2019, "page": 1}));
        let b = CacheKey::new("tmdb.discover", &json!({"page": 1, "year": 2019}));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn function_identity_is_part_of_the_key() {
        let args = json!(["tt0111161"]);
        assert_ne!(
            CacheKey::new("imdb.title", &args),
            CacheKey::new("trakt.title", &args)
        );
    }
}
