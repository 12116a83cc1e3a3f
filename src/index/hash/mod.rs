pub mod error;
pub mod extendible;
pub mod hasher;

pub use error::HashTableError;
pub use extendible::ExtendibleHashTable;
pub use hasher::{DefaultKeyHasher, IdentityKeyHasher, KeyHasher};
