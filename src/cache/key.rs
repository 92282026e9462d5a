use crate::code::Authority;
use std::fmt;
use std::sync::Arc;

/// Key under which a resolver caches one result.
///
/// The owning authority's scope is stripped before the key is built, so `"EPSG:4326"` and
/// `" 4326 "` presented to the EPSG resolver produce equal keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single code.
    Code {
        /// Title of the owning authority.
        authority: Arc<str>,
        /// Code trimmed of the owning authority's scope.
        code: String,
    },
    /// An ordered pair of codes (objects relating `source` to `target`).
    Pair {
        /// Title of the owning authority.
        authority: Arc<str>,
        /// Trimmed source code.
        source: String,
        /// Trimmed target code.
        target: String,
    },
}

impl CacheKey {
    pub fn code(authority: &Authority, code: &str) -> Self {
        Self::Code { authority: authority.shared_title(), code: authority.trim_code(code).to_owned() }
    }

    pub fn pair(authority: &Authority, source: &str, target: &str) -> Self {
        Self::Pair {
            authority: authority.shared_title(),
            source: authority.trim_code(source).to_owned(),
            target: authority.trim_code(target).to_owned(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Code { authority, code } => write!(f, "{}:{}", authority, code),
            CacheKey::Pair { authority, source, target } => {
                write!(f, "{}:{} -> {}:{}", authority, source, authority, target)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(key: &CacheKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn scoped_and_unscoped_codes_produce_equal_keys() {
        let epsg = Authority::new("EPSG");
        let a = CacheKey::code(&epsg, "EPSG:4326");
        let b = CacheKey::code(&epsg, " 4326 ");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn pair_keys_are_ordered() {
        let epsg = Authority::new("EPSG");
        let forward = CacheKey::pair(&epsg, "4326", "EPSG:3857");
        let backward = CacheKey::pair(&epsg, "3857", "4326");
        assert_ne!(forward, backward);
        assert_eq!(forward, CacheKey::pair(&epsg, "epsg:4326", "3857"));
        assert_eq!(forward.to_string(), "EPSG:4326 -> EPSG:3857");
    }

    #[test]
    fn foreign_scope_is_part_of_the_key() {
        let epsg = Authority::new("EPSG");
        assert_ne!(CacheKey::code(&epsg, "ESRI:4326"), CacheKey::code(&epsg, "4326"));
    }
}
