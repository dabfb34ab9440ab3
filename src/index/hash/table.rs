use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;

use crate::common::types::{FramePtr, PageId};
use crate::index::hash::bucket_page::HashBucketPage;
use crate::index::hash::codec::Storable;
use crate::index::hash::directory_page::{HashDirectoryPage, DIRECTORY_ARRAY_SIZE};
use crate::index::hash::error::HashIndexError;
use crate::index::hash::hasher::{DefaultKeyHasher, KeyHasher};
use crate::storage::buffer::ParallelBufferPool;

/// Disk-backed extendible hash index.
///
/// One directory page maps the low `global_depth` bits of a key's hash to
/// a bucket page; buckets split (and the directory doubles) as they fill,
/// and merge back (the directory halving) as they drain. All pages go
/// through the buffer pool, so the index survives eviction and restart.
///
/// A single table latch orders readers and writers; every page fetched is
/// unpinned exactly once on every path through the protocol.
pub struct ExtendibleHashIndex<K, V, H = DefaultKeyHasher> {
    buffer_pool: Arc<ParallelBufferPool>,
    directory_page_id: PageId,
    hasher: H,
    table_latch: RwLock<()>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> ExtendibleHashIndex<K, V, H>
where
    K: Storable,
    V: Storable,
    H: KeyHasher<K>,
{
    /// Create an index with a default-constructed hasher
    pub fn new(buffer_pool: Arc<ParallelBufferPool>) -> Result<Self, HashIndexError>
    where
        H: Default,
    {
        Self::with_hasher(buffer_pool, H::default())
    }

    /// Create an index with one directory page and one empty bucket
    pub fn with_hasher(
        buffer_pool: Arc<ParallelBufferPool>,
        hasher: H,
    ) -> Result<Self, HashIndexError> {
        let (directory_frame, directory_page_id) = buffer_pool.new_page()?;

        let (bucket_frame, bucket_page_id) = match buffer_pool.new_page() {
            Ok(result) => result,
            Err(e) => {
                let _ = buffer_pool.unpin_page(directory_page_id, false);
                let _ = buffer_pool.delete_page(directory_page_id);
                return Err(e.into());
            }
        };

        let mut directory = HashDirectoryPage::new();
        directory.set_bucket_page_id(0, bucket_page_id);
        directory.set_local_depth(0, 0);
        directory.write_to(&mut directory_frame.write().page.data);

        let bucket = HashBucketPage::<K, V>::new();
        bucket.write_to(&mut bucket_frame.write().page.data);

        buffer_pool.unpin_page(directory_page_id, true)?;
        buffer_pool.unpin_page(bucket_page_id, true)?;

        Ok(Self {
            buffer_pool,
            directory_page_id,
            hasher,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// Look up every value stored under `key`
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashIndexError> {
        let _guard = self.table_latch.read();

        let (_directory_frame, directory) = self.fetch_directory()?;
        let index = self.directory_index(key, &directory);
        let bucket_page_id = directory.bucket_page_id(index);

        let bucket_frame = match self.buffer_pool.fetch_page(bucket_page_id) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Err(e.into());
            }
        };

        let result = {
            let guard = bucket_frame.read();
            HashBucketPage::<K, V>::from_bytes(&guard.page.data).get_value(key)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;

        Ok(result)
    }

    /// Insert a key/value pair, splitting the target bucket when full.
    /// An exact duplicate of a live pair is rejected.
    pub fn insert(&self, key: &K, value: &V) -> Result<(), HashIndexError> {
        let _guard = self.table_latch.write();

        let (_directory_frame, directory) = self.fetch_directory()?;
        let index = self.directory_index(key, &directory);
        let bucket_page_id = directory.bucket_page_id(index);

        let bucket_frame = match self.buffer_pool.fetch_page(bucket_page_id) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Err(e.into());
            }
        };

        let mut bucket = {
            let guard = bucket_frame.read();
            HashBucketPage::<K, V>::from_bytes(&guard.page.data)
        };

        if !bucket.is_full() {
            let inserted = bucket.insert(key.clone(), value.clone());
            if inserted {
                bucket.write_to(&mut bucket_frame.write().page.data);
            }
            self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return if inserted {
                Ok(())
            } else {
                Err(HashIndexError::DuplicateEntry)
            };
        }

        // Full bucket. A duplicate would survive the split unchanged, so
        // reject it before restructuring anything.
        let duplicate = bucket.get_value(key).contains(value);
        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        if duplicate {
            return Err(HashIndexError::DuplicateEntry);
        }

        self.split_insert(key, value)
    }

    /// Split the bucket covering `key` and insert the pair.
    ///
    /// If the bucket's local depth has caught up with the global depth the
    /// directory doubles first; afterwards every slot on the "1" side of
    /// the new discriminating bit is redirected to the fresh bucket and
    /// the old bucket's live entries are dealt out between the two.
    fn split_insert(&self, key: &K, value: &V) -> Result<(), HashIndexError> {
        // Take the split image page first; if the pool cannot supply one
        // there is nothing to undo yet.
        let (new_frame, new_page_id) = self.buffer_pool.new_page()?;

        let (directory_frame, mut directory) = match self.fetch_directory() {
            Ok(result) => result,
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(new_page_id, false);
                let _ = self.buffer_pool.delete_page(new_page_id);
                return Err(e);
            }
        };

        let index = self.directory_index(key, &directory);
        let bucket_page_id = directory.bucket_page_id(index);
        let old_depth = directory.local_depth(index);

        if old_depth as u32 == directory.global_depth() {
            if directory.size() * 2 > DIRECTORY_ARRAY_SIZE {
                warn!(
                    "hash directory saturated at global depth {}; insert refused",
                    directory.global_depth()
                );
                let _ = self.buffer_pool.unpin_page(new_page_id, false);
                let _ = self.buffer_pool.delete_page(new_page_id);
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Err(HashIndexError::DirectorySaturated);
            }

            // Double the directory: the new half mirrors the old
            let old_size = directory.size();
            for i in 0..old_size {
                directory.set_bucket_page_id(i + old_size, directory.bucket_page_id(i));
                directory.set_local_depth(i + old_size, directory.local_depth(i));
            }
            directory.incr_global_depth();
        }

        // Deepen every slot of the splitting bucket; slots that disagree
        // with `index` on the new discriminating bit move to the new bucket
        let discriminant = 1usize << old_depth;
        for slot in 0..directory.size() {
            if directory.bucket_page_id(slot) == bucket_page_id {
                directory.incr_local_depth(slot);
                if (slot & discriminant) != (index & discriminant) {
                    directory.set_bucket_page_id(slot, new_page_id);
                }
            }
        }

        let bucket_frame = match self.buffer_pool.fetch_page(bucket_page_id) {
            Ok(frame) => frame,
            Err(e) => {
                // Directory changes were never written back; on-disk state
                // is still the pre-split layout
                let _ = self.buffer_pool.unpin_page(new_page_id, false);
                let _ = self.buffer_pool.delete_page(new_page_id);
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Err(e.into());
            }
        };

        let mut old_bucket = {
            let guard = bucket_frame.read();
            HashBucketPage::<K, V>::from_bytes(&guard.page.data)
        };

        let mut entries = old_bucket.drain_live();
        entries.push((key.clone(), value.clone()));

        let mut new_bucket = HashBucketPage::<K, V>::new();
        let mut inserted_all = true;
        for (k, v) in entries {
            let slot = self.directory_index(&k, &directory);
            let target_page_id = directory.bucket_page_id(slot);
            let inserted = if target_page_id == new_page_id {
                new_bucket.insert(k, v)
            } else {
                debug_assert_eq!(target_page_id, bucket_page_id);
                old_bucket.insert(k, v)
            };
            if !inserted {
                // Only the incoming pair can fail here: the drained
                // entries always fit back into two empty buckets
                inserted_all = false;
                break;
            }
        }

        old_bucket.write_to(&mut bucket_frame.write().page.data);
        new_bucket.write_to(&mut new_frame.write().page.data);
        directory.write_to(&mut directory_frame.write().page.data);

        debug!(
            "split bucket {} into {} (local depth now {})",
            bucket_page_id,
            new_page_id,
            old_depth + 1
        );

        self.buffer_pool.unpin_page(bucket_page_id, true)?;
        self.buffer_pool.unpin_page(new_page_id, true)?;
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;

        if inserted_all {
            Ok(())
        } else {
            Err(HashIndexError::BucketStillFull)
        }
    }

    /// Remove an exact key/value pair; an emptied bucket merges with its
    /// split image when their depths agree.
    pub fn remove(&self, key: &K, value: &V) -> Result<(), HashIndexError> {
        let _guard = self.table_latch.write();

        let (directory_frame, mut directory) = self.fetch_directory()?;
        let index = self.directory_index(key, &directory);
        let bucket_page_id = directory.bucket_page_id(index);

        let bucket_frame = match self.buffer_pool.fetch_page(bucket_page_id) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Err(e.into());
            }
        };

        let mut bucket = {
            let guard = bucket_frame.read();
            HashBucketPage::<K, V>::from_bytes(&guard.page.data)
        };

        let removed = bucket.remove(key, value);
        if removed {
            bucket.write_to(&mut bucket_frame.write().page.data);
        }
        let now_empty = bucket.is_empty();
        self.buffer_pool.unpin_page(bucket_page_id, removed)?;

        // Merge the emptied bucket into its split image, and keep merging
        // while the surviving bucket is itself empty and eligible. The
        // cascade is what lets a fully drained table collapse back to
        // global depth zero: sibling buckets can both sit empty, and only
        // a merge makes their depths line up again.
        let mut directory_dirty = false;
        if removed {
            let mut empty_page_id = bucket_page_id;
            let mut empty = now_empty;
            while empty {
                let slot = self.directory_index(key, &directory);
                if directory.local_depth(slot) == 0 {
                    break;
                }
                let image_slot = directory.split_image_index(slot);
                if directory.local_depth(image_slot) != directory.local_depth(slot) {
                    break;
                }

                if let Err(e) = self.merge_bucket(&mut directory, empty_page_id) {
                    if directory_dirty {
                        directory.write_to(&mut directory_frame.write().page.data);
                    }
                    let _ = self
                        .buffer_pool
                        .unpin_page(self.directory_page_id, directory_dirty);
                    return Err(e);
                }
                directory_dirty = true;

                let survivor_slot = self.directory_index(key, &directory);
                let survivor_page_id = directory.bucket_page_id(survivor_slot);
                let survivor_frame = match self.buffer_pool.fetch_page(survivor_page_id) {
                    Ok(frame) => frame,
                    Err(e) => {
                        directory.write_to(&mut directory_frame.write().page.data);
                        let _ = self.buffer_pool.unpin_page(self.directory_page_id, true);
                        return Err(e.into());
                    }
                };
                empty = {
                    let guard = survivor_frame.read();
                    HashBucketPage::<K, V>::from_bytes(&guard.page.data).is_empty()
                };
                self.buffer_pool.unpin_page(survivor_page_id, false)?;
                empty_page_id = survivor_page_id;
            }

            if directory_dirty {
                directory.write_to(&mut directory_frame.write().page.data);
            }
        }

        self.buffer_pool.unpin_page(self.directory_page_id, directory_dirty)?;

        if removed {
            Ok(())
        } else {
            Err(HashIndexError::EntryNotFound)
        }
    }

    /// Fold an empty bucket into its split image and shrink the directory
    /// to the minimum size covering the deepest bucket.
    fn merge_bucket(
        &self,
        directory: &mut HashDirectoryPage,
        empty_page_id: PageId,
    ) -> Result<(), HashIndexError> {
        for slot in 0..directory.size() {
            if directory.bucket_page_id(slot) == empty_page_id {
                let image_slot = directory.split_image_index(slot);
                directory.set_bucket_page_id(slot, directory.bucket_page_id(image_slot));
                directory.decr_local_depth(slot);
                directory.decr_local_depth(image_slot);
            }
        }

        self.buffer_pool.delete_page(empty_page_id)?;

        while directory.can_shrink() {
            directory.decr_global_depth();
        }

        debug!(
            "merged empty bucket {}; global depth now {}",
            empty_page_id,
            directory.global_depth()
        );

        Ok(())
    }

    /// Current global depth of the directory
    pub fn global_depth(&self) -> Result<u32, HashIndexError> {
        let _guard = self.table_latch.read();
        let (_frame, directory) = self.fetch_directory()?;
        let depth = directory.global_depth();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Structural check of the directory page (see
    /// [`HashDirectoryPage::verify_integrity`])
    pub fn verify_integrity(&self) -> Result<bool, HashIndexError> {
        let _guard = self.table_latch.read();
        let (_frame, directory) = self.fetch_directory()?;
        let consistent = directory.verify_integrity();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(consistent)
    }

    fn fetch_directory(&self) -> Result<(FramePtr, HashDirectoryPage), HashIndexError> {
        let frame = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let directory = {
            let guard = frame.read();
            HashDirectoryPage::from_bytes(&guard.page.data)
        };
        Ok((frame, directory))
    }

    fn directory_index(&self, key: &K, directory: &HashDirectoryPage) -> usize {
        (self.hasher.hash_key(key) & directory.global_depth_mask()) as usize
    }
}
