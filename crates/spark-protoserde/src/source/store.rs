//! 远端对象存储抽象与两个本地实现。
//!
//! # 教案式说明
//! - **意图 (Why)**：缓存只关心两件事：对象当前的变更令牌（廉价的元数据查询）与对象全文；
//!   签名、凭证交换、重试等细节交给实现方。
//! - **契约 (What)**：`stat_object` 不得下载正文；同一内容必须得到同一令牌，内容变化必须得到不同令牌。

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// 对象坐标：桶 + 键。本地文件存储以空桶表示“直接按路径寻址”。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bucket.is_empty() {
            write!(f, "file://{}", self.key)
        } else {
            write!(f, "s3://{}/{}", self.bucket, self.key)
        }
    }
}

/// 对象元数据。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStat {
    /// 不透明的变更令牌（S3 语境下为 ETag）。
    pub change_token: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` does not exist")]
    NotFound(String),
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("object store answered `{location}` with status {status}")]
    Status { location: String, status: u16 },
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// 远端对象存储客户端。
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// 仅查询元数据。
    async fn stat_object(&self, location: &ObjectLocation) -> Result<ObjectStat, StoreError>;

    /// 下载对象全文。
    async fn get_object(&self, location: &ObjectLocation) -> Result<Bytes, StoreError>;
}

/// 内容的 SHA-256 十六进制摘要，用作确定性的变更令牌。
pub fn content_token(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

struct StoredObject {
    body: Bytes,
    token: String,
    modified: DateTime<Utc>,
}

/// 进程内对象存储，供测试与嵌入式场景使用。
///
/// 记录 `stat`/`get` 调用次数，并可模拟整体不可用。
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectLocation, StoredObject>>,
    stat_calls: AtomicUsize,
    get_calls: AtomicUsize,
    outage: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入（或覆盖）对象；令牌为内容摘要。
    pub fn put(&self, location: &ObjectLocation, body: impl Into<Bytes>) {
        let body = body.into();
        let token = content_token(&body);
        self.objects.write().insert(
            location.clone(),
            StoredObject {
                body,
                token,
                modified: Utc::now(),
            },
        );
    }

    pub fn remove(&self, location: &ObjectLocation) {
        self.objects.write().remove(location);
    }

    /// 打开后所有调用都返回 [`StoreError::Unavailable`]。
    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.outage.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn stat_object(&self, location: &ObjectLocation) -> Result<ObjectStat, StoreError> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let objects = self.objects.read();
        let object = objects
            .get(location)
            .ok_or_else(|| StoreError::NotFound(location.to_string()))?;
        Ok(ObjectStat {
            change_token: object.token.clone(),
            last_modified: Some(object.modified),
        })
    }

    async fn get_object(&self, location: &ObjectLocation) -> Result<Bytes, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.objects
            .read()
            .get(location)
            .map(|object| object.body.clone())
            .ok_or_else(|| StoreError::NotFound(location.to_string()))
    }
}

/// 本地文件系统存储。路径为 `root/bucket/key`；空桶时直接使用 `root/key`（`key` 为绝对路径时忽略 `root`）。
///
/// 变更令牌由文件长度与修改时间组成，查询只需一次 `metadata` 调用。
#[derive(Clone, Debug, Default)]
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, location: &ObjectLocation) -> PathBuf {
        let mut path = self.root.clone();
        if !location.bucket.is_empty() {
            path.push(&location.bucket);
        }
        path.push(&location.key);
        path
    }
}

fn io_error(location: &ObjectLocation, err: std::io::Error) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(location.to_string())
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl ObjectStore for FileSystemStore {
    async fn stat_object(&self, location: &ObjectLocation) -> Result<ObjectStat, StoreError> {
        let metadata = tokio::fs::metadata(self.path_of(location))
            .await
            .map_err(|err| io_error(location, err))?;
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        let stamp = modified.map_or(0, |at| at.timestamp_nanos_opt().unwrap_or_default());
        Ok(ObjectStat {
            change_token: format!("{}-{stamp}", metadata.len()),
            last_modified: modified,
        })
    }

    async fn get_object(&self, location: &ObjectLocation) -> Result<Bytes, StoreError> {
        tokio::fs::read(self.path_of(location))
            .await
            .map(Bytes::from)
            .map_err(|err| io_error(location, err))
    }
}
