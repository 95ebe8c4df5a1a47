//! Property-Based Tests
//!
//! Proptest coverage for the pure building blocks: sealed envelopes,
//! identity digests, key patterns, and wire-format determinism.

use proptest::prelude::*;

use veracache::cache::keys::{broaden_pattern, pattern_matches, CollectionScope};
use veracache::codec::integrity::IntegrityCodec;
use veracache::codec::wire;
use veracache::domain::identity::{short_digest, Identity, TypeTag};
use veracache::domain::{EntityGraph, EntityRecord};

fn type_name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,16}"
        .prop_filter("reserved namespace segments are not type names", |name| {
            !matches!(name.as_str(), "collection" | "query" | "lock")
        })
}

proptest! {
    // -------------------------------------------------------------------------
    // Sealed envelopes
    // -------------------------------------------------------------------------

    #[test]
    fn prop_seal_unseal_round_trip(payload in "\\PC*", type_name in type_name_strategy()) {
        let codec = IntegrityCodec::new(b"property-secret".to_vec());
        let tag = TypeTag::new(&type_name).unwrap();

        let raw = codec.seal(payload.clone(), &tag).encode().unwrap();
        prop_assert_eq!(codec.unseal(&raw, &tag).unwrap(), payload);
    }

    #[test]
    fn prop_tampered_digest_always_rejected(
        payload in "\\PC{0,64}",
        idx in 0usize..64,
    ) {
        let codec = IntegrityCodec::new(b"property-secret".to_vec());
        let tag = TypeTag::new("Product").unwrap();

        let mut sealed = codec.seal(payload, &tag);
        let mut digest: Vec<char> = sealed.integrity.chars().collect();
        prop_assume!(idx < digest.len());
        digest[idx] = 'g';
        sealed.integrity = digest.into_iter().collect();

        let raw = sealed.encode().unwrap();
        prop_assert!(codec.unseal(&raw, &tag).is_err());
    }

    #[test]
    fn prop_envelope_bound_to_type(
        payload in "\\PC{0,64}",
        type_a in type_name_strategy(),
        type_b in type_name_strategy(),
    ) {
        prop_assume!(type_a != type_b);
        let codec = IntegrityCodec::new(b"property-secret".to_vec());
        let tag_a = TypeTag::new(&type_a).unwrap();
        let tag_b = TypeTag::new(&type_b).unwrap();

        let raw = codec.seal(payload, &tag_a).encode().unwrap();
        prop_assert!(codec.unseal(&raw, &tag_b).is_err());
    }

    #[test]
    fn prop_index_round_trip(
        identities in proptest::collection::vec("[A-Za-z0-9_-]{1,12}", 0..8),
        scope in "[a-z0-9:_-]{0,24}",
    ) {
        let codec = IntegrityCodec::new(b"property-secret".to_vec());
        let tag = TypeTag::new("Product").unwrap();

        let raw = codec
            .seal_index(&tag, &scope, identities.clone())
            .encode()
            .unwrap();
        prop_assert_eq!(codec.unseal_index(&raw, &tag, &scope).unwrap(), identities);
    }

    #[test]
    fn prop_index_bound_to_scope(
        identities in proptest::collection::vec("[A-Za-z0-9]{1,8}", 1..4),
        scope in "[a-z0-9]{0,16}",
    ) {
        let codec = IntegrityCodec::new(b"property-secret".to_vec());
        let tag = TypeTag::new("Product").unwrap();

        let raw = codec
            .seal_index(&tag, &scope, identities)
            .encode()
            .unwrap();
        let other_scope = format!("{scope}x");
        prop_assert!(codec.unseal_index(&raw, &tag, &other_scope).is_err());
    }

    // -------------------------------------------------------------------------
    // Digests
    // -------------------------------------------------------------------------

    #[test]
    fn prop_short_digest_is_stable_truncated_hex(input in any::<Vec<u8>>()) {
        let digest = short_digest(&input);
        prop_assert_eq!(digest.len(), 32);
        prop_assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        prop_assert_eq!(digest, short_digest(&input));
    }

    // -------------------------------------------------------------------------
    // Key patterns
    // -------------------------------------------------------------------------

    #[test]
    fn prop_literal_pattern_matches_itself(key in "[a-zA-Z0-9:_-]{0,32}") {
        prop_assert!(pattern_matches(&key, &key));
    }

    #[test]
    fn prop_prefix_wildcard_matches_extensions(
        prefix in "[a-z0-9:]{0,16}",
        suffix in "[a-z0-9:]{0,16}",
    ) {
        let pattern = format!("{prefix}*");
        let candidate = format!("{prefix}{suffix}");
        prop_assert!(pattern_matches(&pattern, &candidate));
        prop_assert!(pattern_matches("*", &candidate));
    }

    #[test]
    fn prop_broadening_terminates(pattern in "[a-z:]{0,24}(\\*)?") {
        let mut current = pattern.clone();
        let mut steps = 0;
        while let Some(next) = broaden_pattern(&current) {
            prop_assert!(next.len() < current.len());
            current = next;
            steps += 1;
            prop_assert!(steps <= pattern.len() + 1);
        }
    }

    #[test]
    fn prop_scope_token_independent_of_insertion_order(
        pairs in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{1,8}", 0..5),
    ) {
        let forward = pairs
            .iter()
            .fold(CollectionScope::all(), |scope, (k, v)| {
                scope.filter(k.as_str(), v)
            });
        let reverse = pairs
            .iter()
            .rev()
            .fold(CollectionScope::all(), |scope, (k, v)| {
                scope.filter(k.as_str(), v)
            });
        prop_assert_eq!(forward.token(), reverse.token());
    }

    // -------------------------------------------------------------------------
    // Wire format
    // -------------------------------------------------------------------------

    #[test]
    fn prop_encode_is_deterministic(
        fields in proptest::collection::vec(("[a-z_]{1,10}", any::<i64>()), 0..8),
    ) {
        let mut graph = EntityGraph::new();
        let mut record = EntityRecord::with_identity(
            TypeTag::new("Product").unwrap(),
            Identity::single(42),
        );
        for (name, value) in &fields {
            record = record.field(name.clone(), *value);
        }
        let key = graph.insert(record).unwrap();

        let first = wire::encode(&graph, &key).unwrap();
        let second = wire::encode(&graph, &key).unwrap();
        prop_assert_eq!(first, second);
    }
}
