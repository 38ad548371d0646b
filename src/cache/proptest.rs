//! Property-Based Tests for the Local Tier
//!
//! # Test Properties
//!
//! 1. **Eviction Bound**: resident size never exceeds the byte ceiling
//! 2. **Entry Bound**: resident count never exceeds the entry ceiling
//! 3. **Write Survives**: the key just written is always resident
//! 4. **Accounting**: deleting every key brings the size back to zero

#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use super::entry::CacheKey;
use super::local::{LocalConfig, LocalStore};

// =============================================================================
// Property Strategies
// =============================================================================

/// (key id, entry size) writes; small key space so overwrites happen
fn writes_strategy(max_item: u64) -> impl Strategy<Value = Vec<(u8, u64)>> {
    prop::collection::vec((0u8..64, 1..=max_item), 1..300)
}

fn store(max_bytes: u64, max_entries: usize) -> LocalStore {
    LocalStore::with_config(LocalConfig {
        max_bytes,
        max_entries,
        max_item_bytes: max_bytes,
        low_watermark: 0.9,
    })
}

fn key(id: u8) -> CacheKey {
    CacheKey::new("prop", format!("k{}", id))
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: after every write the tier is within both ceilings.
    #[test]
    fn prop_eviction_bound(
        max_bytes in 64u64..4096,
        max_entries in 1usize..40,
        writes in writes_strategy(64),
    ) {
        let store = store(max_bytes, max_entries);
        for (id, size) in writes {
            store.set(key(id), Arc::new(id), Duration::from_secs(600), &[], size);
            prop_assert!(store.size_bytes() <= max_bytes,
                "size {} over ceiling {}", store.size_bytes(), max_bytes);
            prop_assert!(store.len() <= max_entries.max(1));
        }
    }

    /// Property: the entry written by a set is never its own eviction victim.
    #[test]
    fn prop_written_key_survives(
        writes in writes_strategy(128),
    ) {
        let store = store(512, 8);
        for (id, size) in writes {
            let admission = store.set(key(id), Arc::new(id), Duration::from_secs(600), &[], size);
            prop_assert!(admission.is_stored());
            prop_assert!(store.contains(&key(id)));
            prop_assert_eq!(store.get(&key(id)).and_then(|e| e.downcast::<u8>()), Some(id));
        }
    }

    /// Property: size accounting returns to zero once every key is deleted.
    #[test]
    fn prop_size_accounting(
        writes in writes_strategy(256),
    ) {
        let store = store(1 << 20, 10_000);
        for (id, size) in &writes {
            store.set(key(*id), Arc::new(*id), Duration::from_secs(600), &[], *size);
        }
        for id in 0u8..64 {
            store.delete(&key(id));
        }
        prop_assert_eq!(store.size_bytes(), 0);
        prop_assert!(store.is_empty());
    }
}
