pub mod bucket_page;
pub mod codec;
pub mod directory_page;
pub mod error;
pub mod hasher;
pub mod table;

pub use bucket_page::{bucket_capacity, HashBucketPage};
pub use codec::Storable;
pub use directory_page::{HashDirectoryPage, DIRECTORY_ARRAY_SIZE};
pub use error::HashIndexError;
pub use hasher::{DefaultKeyHasher, KeyHasher};
pub use table::ExtendibleHashIndex;
