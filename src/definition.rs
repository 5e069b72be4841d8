//! Per-cache configuration.
//!
//! A [`Definition`] describes one logical cache: which component/area it
//! belongs to, its TTL, whether the request-scoped acceleration tier is
//! enabled and how large it may grow, which invalidation events it
//! subscribes to, and the identifiers that scope its keys.
//!
//! Definitions are immutable after construction with one exception: the
//! identifier set may be replaced at runtime, which changes the parsed-key
//! space (the loader purges its acceleration tier when that happens).

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// Immutable configuration for a single cache.
///
/// Built with chained setters:
///
/// ```
/// use cachefront::definition::Definition;
///
/// let definition = Definition::new("core", "coursemodinfo")
///     .ttl(600)
///     .static_acceleration(Some(10))
///     .invalidation_events(["changesincourse"]);
/// assert_eq!(definition.ttl_secs(), 600);
/// assert!(definition.uses_static_acceleration());
/// ```
#[derive(Debug, Clone)]
pub struct Definition {
    component: String,
    area: String,
    ttl: u64,
    uses_simple_data: bool,
    uses_static_acceleration: bool,
    static_acceleration_size: Option<usize>,
    require_locking: bool,
    invalidation_events: Vec<String>,
    identifiers: BTreeMap<String, String>,
}

impl Definition {
    /// Creates a definition for the given component/area with defaults:
    /// no TTL, no acceleration, no locking, no events, no identifiers.
    pub fn new(component: impl Into<String>, area: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            area: area.into(),
            ttl: 0,
            uses_simple_data: false,
            uses_static_acceleration: false,
            static_acceleration_size: None,
            require_locking: false,
            invalidation_events: Vec::new(),
            identifiers: BTreeMap::new(),
        }
    }

    /// Sets the time-to-live in seconds. Zero disables TTL wrapping.
    pub fn ttl(mut self, secs: u64) -> Self {
        self.ttl = secs;
        self
    }

    /// Declares that cached values are simple data: scalars, or structures
    /// the caller guarantees contain no shared references. Skips both the
    /// serialized acceleration form and reference breaking on read.
    pub fn simple_data(mut self, yes: bool) -> Self {
        self.uses_simple_data = yes;
        self
    }

    /// Enables the request-scoped acceleration tier with an optional entry
    /// bound (`None` = unbounded).
    pub fn static_acceleration(mut self, size: Option<usize>) -> Self {
        self.uses_static_acceleration = true;
        self.static_acceleration_size = size;
        self
    }

    /// Requires an advisory per-key lock around backfill writes.
    pub fn require_locking(mut self, yes: bool) -> Self {
        self.require_locking = yes;
        self
    }

    /// Subscribes this cache to the given invalidation events.
    pub fn invalidation_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidation_events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the initial identifier map.
    pub fn identifiers(mut self, identifiers: BTreeMap<String, String>) -> Self {
        self.identifiers = identifiers;
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl
    }

    pub fn uses_simple_data(&self) -> bool {
        self.uses_simple_data
    }

    pub fn uses_static_acceleration(&self) -> bool {
        self.uses_static_acceleration
    }

    /// Acceleration entry bound; `None` means unbounded.
    pub fn static_acceleration_size(&self) -> Option<usize> {
        self.static_acceleration_size
    }

    pub fn requires_locking(&self) -> bool {
        self.require_locking
    }

    pub fn subscribed_events(&self) -> &[String] {
        &self.invalidation_events
    }

    /// Replaces the identifier set, returning whether anything changed.
    ///
    /// A change invalidates every parsed key derived so far; the loader
    /// reacts by purging its acceleration tier.
    pub fn set_identifiers(&mut self, identifiers: BTreeMap<String, String>) -> bool {
        if self.identifiers == identifiers {
            return false;
        }
        self.identifiers = identifiers;
        true
    }

    /// Ordered identifier pairs for stores that address entries by
    /// `{component, area, identifiers…, key}` natively.
    pub fn generate_multi_key_parts(&self) -> Vec<(String, String)> {
        self.identifiers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Deterministic hash of the definition identity (component, area,
    /// identifiers). Stable across processes: FxHasher is seeded with a
    /// fixed key, so equal inputs hash equally everywhere.
    pub fn definition_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.component.hash(&mut hasher);
        self.area.hash(&mut hasher);
        for (name, value) in &self.identifiers {
            name.hash(&mut hasher);
            value.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idents(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_conservative() {
        let definition = Definition::new("core", "string");
        assert_eq!(definition.ttl_secs(), 0);
        assert!(!definition.uses_static_acceleration());
        assert!(!definition.uses_simple_data());
        assert!(!definition.requires_locking());
        assert!(definition.subscribed_events().is_empty());
    }

    #[test]
    fn set_identifiers_reports_changes() {
        let mut definition =
            Definition::new("core", "coursemodinfo").identifiers(idents(&[("course", "1")]));

        assert!(!definition.set_identifiers(idents(&[("course", "1")])));
        assert!(definition.set_identifiers(idents(&[("course", "2")])));
        assert_eq!(
            definition.generate_multi_key_parts(),
            vec![("course".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn definition_hash_is_stable_and_identifier_sensitive() {
        let a = Definition::new("core", "coursemodinfo").identifiers(idents(&[("course", "1")]));
        let b = Definition::new("core", "coursemodinfo").identifiers(idents(&[("course", "1")]));
        let c = Definition::new("core", "coursemodinfo").identifiers(idents(&[("course", "2")]));

        assert_eq!(a.definition_hash(), b.definition_hash());
        assert_ne!(a.definition_hash(), c.definition_hash());
    }

    #[test]
    fn hash_distinguishes_component_and_area() {
        let a = Definition::new("core", "alpha");
        let b = Definition::new("core", "beta");
        let c = Definition::new("mod_forum", "alpha");
        assert_ne!(a.definition_hash(), b.definition_hash());
        assert_ne!(a.definition_hash(), c.definition_hash());
    }
}
