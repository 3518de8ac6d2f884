//! 远端来源：对象存储抽象 + 自适应缓存。

pub mod cache;
#[cfg(feature = "s3-store")]
pub mod s3;
pub mod store;

pub use cache::{
    AdaptiveCache, BundleParser, BundleSource, CacheEntry, PayloadParser, RouteMapParser,
    RouteMapSource,
};
#[cfg(feature = "s3-store")]
pub use s3::S3ObjectStore;
pub use store::{
    FileSystemStore, InMemoryObjectStore, ObjectLocation, ObjectStat, ObjectStore, StoreError,
    content_token,
};
