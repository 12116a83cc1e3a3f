mod bucket;
mod codec;
mod directory;

pub use bucket::{bucket_array_size, HashTableBucketPage};
pub use codec::Storable;
pub use directory::{
    DirectoryIntegrityError, HashTableDirectoryPage, DIRECTORY_ARRAY_SIZE, MAX_DIRECTORY_DEPTH,
};
