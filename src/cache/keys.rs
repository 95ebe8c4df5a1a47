//! Cache Key Construction
//!
//! Every stored key lives under a single configurable prefix, with reserved
//! second segments fencing off the non-entity namespaces:
//!
//! ```text
//! entity:      prefix:Type:identity
//! collection:  prefix:collection:Type:criteria[:o_digest][:limit_N][:offset_N]
//! query:       prefix:query:Type:digest(callerKey)
//! lock:        prefix:lock:Type:identity
//! ```
//!
//! `collection`, `query` and `lock` are rejected as type tags, so an entity
//! key can never collide with the other namespaces.

use std::collections::BTreeMap;

use crate::domain::identity::{short_digest, EntityKey, Identity, TypeTag};

const COLLECTION_SEGMENT: &str = "collection";
const QUERY_SEGMENT: &str = "query";
const LOCK_SEGMENT: &str = "lock";

/// Separator used when feeding criteria and ordering terms to the digest.
const FIELD_SEPARATOR: char = '\u{1F}';

// =============================================================================
// Collection Scope
// =============================================================================

/// Sort direction for an ordered collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// What a cached collection entry covers: filter criteria, ordering, and an
/// optional window. Criteria are kept sorted by field name so the same
/// logical scope always produces the same key; ordering keeps its given
/// sequence because sort precedence is significant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionScope {
    criteria: BTreeMap<String, String>,
    ordering: Vec<(String, SortOrder)>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl CollectionScope {
    /// Scope matching every instance of a type, in store order.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add a filter criterion.
    pub fn filter(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.criteria.insert(field.into(), value.to_string());
        self
    }

    /// Append a sort field. Precedence follows call order.
    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.ordering.push((field.into(), order));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Digest segment for the filter criteria, or `all` when unfiltered.
    fn criteria_token(&self) -> String {
        if self.criteria.is_empty() {
            return "all".to_string();
        }
        let mut joined = String::new();
        for (field, value) in &self.criteria {
            if !joined.is_empty() {
                joined.push(FIELD_SEPARATOR);
            }
            joined.push_str(field);
            joined.push(FIELD_SEPARATOR);
            joined.push_str(value);
        }
        short_digest(joined.as_bytes())
    }

    fn ordering_token(&self) -> Option<String> {
        if self.ordering.is_empty() {
            return None;
        }
        let mut joined = String::new();
        for (field, order) in &self.ordering {
            if !joined.is_empty() {
                joined.push(FIELD_SEPARATOR);
            }
            joined.push_str(field);
            joined.push(FIELD_SEPARATOR);
            joined.push_str(order.as_str());
        }
        Some(format!("o_{}", short_digest(joined.as_bytes())))
    }

    /// The full key suffix for this scope. Also the string the sealed index
    /// digest is bound to, so an index entry cannot be replayed for a
    /// different scope.
    pub fn token(&self) -> String {
        let mut token = self.criteria_token();
        if let Some(ordering) = self.ordering_token() {
            token.push(':');
            token.push_str(&ordering);
        }
        if let Some(limit) = self.limit {
            token.push_str(&format!(":limit_{limit}"));
        }
        if let Some(offset) = self.offset {
            token.push_str(&format!(":offset_{offset}"));
        }
        token
    }
}

// =============================================================================
// Key Factory
// =============================================================================

/// Which namespace a raw key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpace {
    Entity,
    Collection,
    Query,
    Lock,
}

/// Builds every key and pattern for one cache prefix.
#[derive(Debug, Clone)]
pub struct KeyFactory {
    prefix: String,
}

impl KeyFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn entity_key(&self, key: &EntityKey) -> String {
        self.entity_key_parts(&key.type_tag, &key.identity)
    }

    pub fn entity_key_parts(&self, type_tag: &TypeTag, identity: &Identity) -> String {
        format!("{}:{}:{}", self.prefix, type_tag, identity)
    }

    pub fn lock_key(&self, key: &EntityKey) -> String {
        format!(
            "{}:{LOCK_SEGMENT}:{}:{}",
            self.prefix, key.type_tag, key.identity
        )
    }

    pub fn collection_key(&self, type_tag: &TypeTag, scope: &CollectionScope) -> String {
        format!(
            "{}:{COLLECTION_SEGMENT}:{}:{}",
            self.prefix,
            type_tag,
            scope.token()
        )
    }

    pub fn query_key(&self, type_tag: &TypeTag, caller_key: &str) -> String {
        format!(
            "{}:{QUERY_SEGMENT}:{}:{}",
            self.prefix,
            type_tag,
            short_digest(caller_key.as_bytes())
        )
    }

    // -------------------------------------------------------------------------
    // Patterns
    // -------------------------------------------------------------------------

    pub fn entity_pattern(&self, type_tag: &TypeTag) -> String {
        format!("{}:{}:*", self.prefix, type_tag)
    }

    pub fn collection_pattern(&self, type_tag: Option<&TypeTag>) -> String {
        match type_tag {
            Some(tag) => format!("{}:{COLLECTION_SEGMENT}:{}:*", self.prefix, tag),
            None => format!("{}:{COLLECTION_SEGMENT}:*", self.prefix),
        }
    }

    pub fn query_pattern(&self, type_tag: Option<&TypeTag>) -> String {
        match type_tag {
            Some(tag) => format!("{}:{QUERY_SEGMENT}:{}:*", self.prefix, tag),
            None => format!("{}:{QUERY_SEGMENT}:*", self.prefix),
        }
    }

    pub fn lock_pattern(&self, type_tag: Option<&TypeTag>) -> String {
        match type_tag {
            Some(tag) => format!("{}:{LOCK_SEGMENT}:{}:*", self.prefix, tag),
            None => format!("{}:{LOCK_SEGMENT}:*", self.prefix),
        }
    }

    pub fn all_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }

    /// Classify a raw key by its namespace segment. `None` for keys outside
    /// this factory's prefix.
    pub fn keyspace_of(&self, raw: &str) -> Option<KeySpace> {
        let rest = raw.strip_prefix(&self.prefix)?.strip_prefix(':')?;
        let segment = rest.split(':').next()?;
        Some(match segment {
            COLLECTION_SEGMENT => KeySpace::Collection,
            QUERY_SEGMENT => KeySpace::Query,
            LOCK_SEGMENT => KeySpace::Lock,
            _ => KeySpace::Entity,
        })
    }
}

// =============================================================================
// Pattern utilities
// =============================================================================

/// Glob match with `*` as the only wildcard. Greedy with backtracking, so
/// patterns may hold any number of wildcards.
pub fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();

    let mut pi = 0;
    let mut ci = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ci < c.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ci;
            pi += 1;
        } else if pi < p.len() && p[pi] == c[ci] {
            pi += 1;
            ci += 1;
        } else if let Some(star_at) = star {
            // Let the last star swallow one more character and retry.
            pi = star_at + 1;
            mark += 1;
            ci = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Widen a pattern to the last separator before its first wildcard, for the
/// enumeration fallback tier. Returns `None` when the pattern has no
/// wildcard or cannot be widened further.
pub fn broaden_pattern(pattern: &str) -> Option<String> {
    let star = pattern.find('*')?;
    let head = pattern[..star].trim_end_matches(':');
    let cut = head.rfind(':')?;
    let broadened = format!("{}*", &pattern[..=cut]);
    (broadened != pattern).then_some(broadened)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> TypeTag {
        TypeTag::new(name).unwrap()
    }

    fn factory() -> KeyFactory {
        KeyFactory::new("vc")
    }

    #[test]
    fn test_entity_and_lock_keys() {
        let key = EntityKey::new(tag("Product"), Identity::single(42));
        assert_eq!(factory().entity_key(&key), "vc:Product:42");
        assert_eq!(factory().lock_key(&key), "vc:lock:Product:42");
    }

    #[test]
    fn test_unfiltered_collection_key() {
        let key = factory().collection_key(&tag("Product"), &CollectionScope::all());
        assert_eq!(key, "vc:collection:Product:all");
    }

    #[test]
    fn test_criteria_digest_is_order_independent() {
        let ab = CollectionScope::all()
            .filter("category", "tools")
            .filter("active", "true");
        let ba = CollectionScope::all()
            .filter("active", "true")
            .filter("category", "tools");
        assert_eq!(ab.token(), ba.token());
        assert_ne!(
            ab.token(),
            CollectionScope::all().filter("active", "false").token()
        );
    }

    #[test]
    fn test_ordering_precedence_is_significant() {
        let name_then_price = CollectionScope::all()
            .order_by("name", SortOrder::Ascending)
            .order_by("price", SortOrder::Descending);
        let price_then_name = CollectionScope::all()
            .order_by("price", SortOrder::Descending)
            .order_by("name", SortOrder::Ascending);
        assert_ne!(name_then_price.token(), price_then_name.token());
    }

    #[test]
    fn test_window_segments() {
        let scope = CollectionScope::all().with_limit(10).with_offset(20);
        let key = factory().collection_key(&tag("Product"), &scope);
        assert_eq!(key, "vc:collection:Product:all:limit_10:offset_20");
    }

    #[test]
    fn test_full_scope_token_shape() {
        let scope = CollectionScope::all()
            .filter("category", "tools")
            .order_by("name", SortOrder::Ascending)
            .with_limit(5);
        let token = scope.token();
        let parts: Vec<&str> = token.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 32);
        assert!(parts[1].starts_with("o_"));
        assert_eq!(parts[2], "limit_5");
    }

    #[test]
    fn test_query_key_digests_caller_key() {
        let key = factory().query_key(&tag("Product"), "featured");
        assert!(key.starts_with("vc:query:Product:"));
        let digest = key.rsplit(':').next().unwrap();
        assert_eq!(digest.len(), 32);
        // Same caller key, same digest.
        assert_eq!(key, factory().query_key(&tag("Product"), "featured"));
        assert_ne!(key, factory().query_key(&tag("Product"), "clearance"));
    }

    #[test]
    fn test_patterns() {
        let f = factory();
        assert_eq!(f.entity_pattern(&tag("Product")), "vc:Product:*");
        assert_eq!(f.collection_pattern(Some(&tag("Product"))), "vc:collection:Product:*");
        assert_eq!(f.collection_pattern(None), "vc:collection:*");
        assert_eq!(f.query_pattern(None), "vc:query:*");
        assert_eq!(f.lock_pattern(Some(&tag("Product"))), "vc:lock:Product:*");
        assert_eq!(f.all_pattern(), "vc:*");
    }

    #[test]
    fn test_keyspace_classification() {
        let f = factory();
        assert_eq!(f.keyspace_of("vc:Product:42"), Some(KeySpace::Entity));
        assert_eq!(f.keyspace_of("vc:collection:Product:all"), Some(KeySpace::Collection));
        assert_eq!(f.keyspace_of("vc:query:Product:abc"), Some(KeySpace::Query));
        assert_eq!(f.keyspace_of("vc:lock:Product:42"), Some(KeySpace::Lock));
        assert_eq!(f.keyspace_of("other:Product:42"), None);
    }

    #[test]
    fn test_pattern_matches_basics() {
        assert!(pattern_matches("vc:Product:*", "vc:Product:42"));
        assert!(pattern_matches("vc:Product:*", "vc:Product:"));
        assert!(!pattern_matches("vc:Product:*", "vc:Customer:42"));
        assert!(pattern_matches("vc:*:42", "vc:Product:42"));
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("vc:Product:42", "vc:Product:42"));
        assert!(!pattern_matches("vc:Product:42", "vc:Product:420"));
    }

    #[test]
    fn test_pattern_matches_multiple_wildcards() {
        assert!(pattern_matches("vc:*:Product:*", "vc:collection:Product:all"));
        assert!(!pattern_matches("vc:*:Product:*", "vc:collection:Customer:all"));
        assert!(pattern_matches("*Product*", "vc:Product:42"));
    }

    #[test]
    fn test_broaden_pattern_chain() {
        let original = "vc:collection:Product:*";
        let once = broaden_pattern(original).unwrap();
        assert_eq!(once, "vc:collection:*");
        let twice = broaden_pattern(&once).unwrap();
        assert_eq!(twice, "vc:*");
        assert_eq!(broaden_pattern(&twice), None);
        assert_eq!(broaden_pattern("no-wildcard-here"), None);
    }
}
