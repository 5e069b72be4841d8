//! Caller keys and store-suitable parsed keys.
//!
//! Callers address entries with scalar keys ([`CacheKey`]). Before a store
//! is consulted the key is parsed into a [`ParsedKey`]: a deterministic
//! string hash of `(definition identity, key)` by default, or a structured
//! multi-part record when the store addresses entries by
//! `{component, area, identifiers…, key}` natively.

use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::definition::Definition;

/// A scalar key supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    Str(String),
    Int(i64),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Str(s) => f.write_str(s),
            CacheKey::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        CacheKey::Str(value.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        CacheKey::Str(value)
    }
}

impl From<i64> for CacheKey {
    fn from(value: i64) -> Self {
        CacheKey::Int(value)
    }
}

/// A key in the form the owning store expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParsedKey {
    /// Hash of `(definition identity, key)`, hex-encoded.
    Hash(String),
    /// Structured record for stores with native multi-identifier support.
    Multi {
        component: String,
        area: String,
        identifiers: Vec<(String, String)>,
        key: String,
    },
}

/// Parses a caller key for the given definition and store conventions.
///
/// Two calls with equal inputs always produce equal outputs, and the hash
/// form is deterministic across processes (fixed-seed FxHasher).
///
/// ```
/// use cachefront::definition::Definition;
/// use cachefront::key::{parse_key, CacheKey, ParsedKey};
///
/// let definition = Definition::new("core", "string");
/// let a = parse_key(&definition, &CacheKey::from("greeting"), false);
/// let b = parse_key(&definition, &CacheKey::from("greeting"), false);
/// assert_eq!(a, b);
/// assert!(matches!(a, ParsedKey::Hash(_)));
/// ```
pub fn parse_key(definition: &Definition, key: &CacheKey, multi_identifier: bool) -> ParsedKey {
    if multi_identifier {
        return ParsedKey::Multi {
            component: definition.component().to_string(),
            area: definition.area().to_string(),
            identifiers: definition.generate_multi_key_parts(),
            key: key.to_string(),
        };
    }
    let mut hasher = FxHasher::default();
    definition.definition_hash().hash(&mut hasher);
    key.hash(&mut hasher);
    ParsedKey::Hash(format!("{:016x}", hasher.finish()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn hash_keys_are_deterministic() {
        let definition = Definition::new("core", "string");
        let a = parse_key(&definition, &CacheKey::from("k1"), false);
        let b = parse_key(&definition, &CacheKey::from("k1"), false);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_keys_distinguish_definitions_and_keys() {
        let a = Definition::new("core", "alpha");
        let b = Definition::new("core", "beta");

        assert_ne!(
            parse_key(&a, &CacheKey::from("k"), false),
            parse_key(&b, &CacheKey::from("k"), false)
        );
        assert_ne!(
            parse_key(&a, &CacheKey::from("k1"), false),
            parse_key(&a, &CacheKey::from("k2"), false)
        );
    }

    #[test]
    fn string_and_int_keys_do_not_collide() {
        let definition = Definition::new("core", "string");
        assert_ne!(
            parse_key(&definition, &CacheKey::from("7"), false),
            parse_key(&definition, &CacheKey::from(7), false)
        );
    }

    #[test]
    fn multi_keys_carry_identifiers_in_order() {
        let mut identifiers = BTreeMap::new();
        identifiers.insert("course".to_string(), "11".to_string());
        identifiers.insert("user".to_string(), "3".to_string());
        let definition = Definition::new("core", "coursemodinfo").identifiers(identifiers);

        let parsed = parse_key(&definition, &CacheKey::from(42), true);
        match parsed {
            ParsedKey::Multi {
                component,
                area,
                identifiers,
                key,
            } => {
                assert_eq!(component, "core");
                assert_eq!(area, "coursemodinfo");
                assert_eq!(
                    identifiers,
                    vec![
                        ("course".to_string(), "11".to_string()),
                        ("user".to_string(), "3".to_string()),
                    ]
                );
                assert_eq!(key, "42");
            },
            other => panic!("expected multi key, got {other:?}"),
        }
    }

    #[test]
    fn identifier_change_changes_the_hash_form() {
        let mut definition = Definition::new("core", "coursemodinfo");
        let before = parse_key(&definition, &CacheKey::from("k"), false);

        let mut identifiers = BTreeMap::new();
        identifiers.insert("course".to_string(), "9".to_string());
        assert!(definition.set_identifiers(identifiers));

        let after = parse_key(&definition, &CacheKey::from("k"), false);
        assert_ne!(before, after);
    }
}
