use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use kestreldb::common::types::Rid;
use kestreldb::index::hash::{bucket_capacity, DefaultKeyHasher, HashIndexError};
use kestreldb::ExtendibleHashIndex;

mod common;
use common::{create_test_parallel_pool, IdentityHasher};

type IdentityIndex = ExtendibleHashIndex<u32, u32, IdentityHasher>;

#[test]
fn test_insert_and_get() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = ExtendibleHashIndex::<u32, Rid, DefaultKeyHasher>::new(pool)?;

    index.insert(&1, &Rid::new(1, 0))?;
    index.insert(&2, &Rid::new(1, 1))?;

    assert_eq!(index.get_value(&1)?, vec![Rid::new(1, 0)]);
    assert_eq!(index.get_value(&2)?, vec![Rid::new(1, 1)]);
    assert!(index.get_value(&3)?.is_empty());
    Ok(())
}

#[test]
fn test_multiple_values_per_key() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = ExtendibleHashIndex::<u32, Rid, DefaultKeyHasher>::new(pool)?;

    index.insert(&7, &Rid::new(2, 0))?;
    index.insert(&7, &Rid::new(2, 1))?;

    let mut values = index.get_value(&7)?;
    values.sort();
    assert_eq!(values, vec![Rid::new(2, 0), Rid::new(2, 1)]);

    index.remove(&7, &Rid::new(2, 0))?;
    assert_eq!(index.get_value(&7)?, vec![Rid::new(2, 1)]);
    Ok(())
}

#[test]
fn test_duplicate_pair_rejected() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = ExtendibleHashIndex::<u32, u32, DefaultKeyHasher>::new(pool)?;

    index.insert(&5, &50)?;
    assert!(matches!(
        index.insert(&5, &50),
        Err(HashIndexError::DuplicateEntry)
    ));
    // Same key with a different value is a separate entry
    index.insert(&5, &51)?;
    Ok(())
}

#[test]
fn test_remove_missing_pair_fails() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = ExtendibleHashIndex::<u32, u32, DefaultKeyHasher>::new(pool)?;

    index.insert(&5, &50)?;
    assert!(matches!(
        index.remove(&5, &51),
        Err(HashIndexError::EntryNotFound)
    ));
    assert!(matches!(
        index.remove(&6, &60),
        Err(HashIndexError::EntryNotFound)
    ));
    Ok(())
}

/// Consecutive integer hashes fill the single bucket exactly; one more
/// insert splits it, the directory doubles, and every key stays reachable.
#[test]
fn test_overflowing_bucket_splits() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = IdentityIndex::new(pool)?;
    let capacity = bucket_capacity::<u32, u32>() as u32;

    for key in 0..capacity {
        index.insert(&key, &key)?;
    }
    assert_eq!(index.global_depth()?, 0);

    index.insert(&capacity, &capacity)?;
    assert_eq!(index.global_depth()?, 1);
    assert!(index.verify_integrity()?);

    for key in 0..=capacity {
        assert_eq!(index.get_value(&key)?, vec![key], "key {}", key);
    }
    Ok(())
}

/// After the split, draining every odd-hashed key empties the odd bucket;
/// the merge folds it back and the directory shrinks to depth zero.
#[test]
fn test_empty_bucket_merges_and_directory_shrinks() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = IdentityIndex::new(pool)?;
    let capacity = bucket_capacity::<u32, u32>() as u32;

    for key in 0..=capacity {
        index.insert(&key, &key)?;
    }
    assert_eq!(index.global_depth()?, 1);

    for key in (1..=capacity).filter(|k| k % 2 == 1) {
        index.remove(&key, &key)?;
    }
    assert_eq!(index.global_depth()?, 0);
    assert!(index.verify_integrity()?);

    for key in (0..=capacity).step_by(2) {
        assert_eq!(index.get_value(&key)?, vec![key]);
    }
    for key in (1..=capacity).filter(|k| k % 2 == 1) {
        assert!(index.get_value(&key)?.is_empty());
    }
    Ok(())
}

/// Keys sharing their low bits defeat one split: the rehash lands every
/// entry back in the same bucket and the insert reports failure, leaving a
/// deeper directory behind. Retrying splits again until the discriminating
/// bit finally separates the keys.
#[test]
fn test_shared_prefix_keys_need_repeated_splits() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = IdentityIndex::new(pool)?;
    let capacity = bucket_capacity::<u32, u32>() as u32;

    // Multiples of 4 agree on bits 0 and 1
    for i in 0..capacity {
        index.insert(&(i * 4), &i)?;
    }

    let straggler = capacity * 4;
    let mut failures = 0;
    loop {
        match index.insert(&straggler, &capacity) {
            Ok(()) => break,
            Err(HashIndexError::BucketStillFull) => failures += 1,
            Err(e) => return Err(e.into()),
        }
    }

    // Splits on bit 0 and bit 1 cannot separate the keys; bit 2 can
    assert_eq!(failures, 2);
    assert_eq!(index.global_depth()?, 3);
    assert!(index.verify_integrity()?);

    for i in 0..=capacity {
        assert_eq!(index.get_value(&(i * 4))?, vec![i]);
    }
    Ok(())
}

/// A bucket whose local depth trails the global depth splits without
/// doubling the directory.
#[test]
fn test_split_without_directory_doubling() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = IdentityIndex::new(pool)?;
    let capacity = bucket_capacity::<u32, u32>() as u32;

    // Even keys agree on bit 0, so the first overflow takes two splits and
    // leaves the directory at depth 2 with the odd-side bucket at depth 1
    for i in 0..capacity {
        index.insert(&(i * 2), &i)?;
    }
    let even_straggler = capacity * 2;
    assert!(matches!(
        index.insert(&even_straggler, &capacity),
        Err(HashIndexError::BucketStillFull)
    ));
    index.insert(&even_straggler, &capacity)?;
    assert_eq!(index.global_depth()?, 2);

    // Odd keys fill the shallow bucket; its split separates on bit 1
    // while the directory stays at depth 2
    for i in 0..capacity {
        index.insert(&(i * 2 + 1), &i)?;
    }
    index.insert(&(capacity * 2 + 1), &capacity)?;
    assert_eq!(index.global_depth()?, 2);
    assert!(index.verify_integrity()?);

    assert_eq!(index.get_value(&1)?, vec![0]);
    assert_eq!(index.get_value(&(capacity * 2 + 1))?, vec![capacity]);
    Ok(())
}

/// Splitting stops once the directory would outgrow its page
#[test]
fn test_directory_saturation_refuses_insert() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = IdentityIndex::new(pool)?;
    let capacity = bucket_capacity::<u32, u32>() as u32;

    // Multiples of 512 agree on all nine directory bits
    for i in 0..capacity {
        index.insert(&(i * 512), &i)?;
    }

    let straggler = capacity * 512;
    let mut still_full = 0;
    let saturated = loop {
        match index.insert(&straggler, &capacity) {
            Ok(()) => break false,
            Err(HashIndexError::BucketStillFull) => still_full += 1,
            Err(HashIndexError::DirectorySaturated) => break true,
            Err(e) => return Err(e.into()),
        }
    };

    assert!(saturated);
    assert_eq!(still_full, 9);
    assert_eq!(index.global_depth()?, 9);
    assert!(index.verify_integrity()?);

    // Nothing was lost along the way
    for i in 0..capacity {
        assert_eq!(index.get_value(&(i * 512))?, vec![i]);
    }
    assert!(index.get_value(&straggler)?.is_empty());
    Ok(())
}

/// Random insert/remove workload: everything inserted is found, everything
/// removed is gone, and a fully drained index collapses to depth zero.
#[test]
fn test_random_workload_round_trip() -> Result<()> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
    let (pool, _temp_file) = create_test_parallel_pool(2, 8)?;
    let index = ExtendibleHashIndex::<u64, u64, DefaultKeyHasher>::new(pool)?;

    let mut keys: Vec<u64> = (0..1500).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        index.insert(&key, &(key * 3))?;
    }
    assert!(index.global_depth()? >= 1);
    assert!(index.verify_integrity()?);

    for &key in &keys {
        assert_eq!(index.get_value(&key)?, vec![key * 3]);
    }

    keys.shuffle(&mut rng);
    let (first_half, second_half) = keys.split_at(keys.len() / 2);
    for &key in first_half {
        index.remove(&key, &(key * 3))?;
    }
    for &key in first_half {
        assert!(index.get_value(&key)?.is_empty());
    }
    for &key in second_half {
        assert_eq!(index.get_value(&key)?, vec![key * 3]);
    }

    for &key in second_half {
        index.remove(&key, &(key * 3))?;
    }
    for &key in &keys {
        assert!(index.get_value(&key)?.is_empty());
    }
    assert_eq!(index.global_depth()?, 0);
    assert!(index.verify_integrity()?);
    Ok(())
}
