//! S3 兼容端点的对象存储实现。
//!
//! # 教案式说明
//! - **意图 (Why)**：描述符集与路由表通常放在私有桶里，请求必须带 SigV4 签名。
//! - **契约 (What)**：
//!   - 配置了 `s3.auth.access.key` / `s3.auth.secret.key` 时使用静态密钥；
//!     否则沿用运行环境的凭证链（`AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`、web identity、实例元数据）；
//!   - 签名区域取 `s3.region`，缺省 `us-east-1`；端点为 `http://` 时才允许明文连接；
//!   - 始终 path-style 寻址，兼容 MinIO 等自建端点。
//! - **实现 (How)**：每个桶懒构建一个 `AmazonS3` 客户端并缓存；`HEAD` 的 `ETag`（缺失时退回
//!   `Last-Modified`）作为变更令牌，`GET` 取正文。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::ObjectStore as _;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use parking_lot::Mutex;

use super::store::{ObjectLocation, ObjectStat, ObjectStore, StoreError};
use crate::configuration::RemoteStoreSettings;

pub struct S3ObjectStore {
    settings: RemoteStoreSettings,
    clients: Mutex<HashMap<String, Arc<AmazonS3>>>,
}

impl S3ObjectStore {
    pub fn new(settings: RemoteStoreSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &RemoteStoreSettings {
        &self.settings
    }

    fn builder(&self, bucket: &str) -> AmazonS3Builder {
        let builder = match &self.settings.credentials {
            Some(credentials) => AmazonS3Builder::new()
                .with_access_key_id(&credentials.access_key)
                .with_secret_access_key(&credentials.secret_key),
            None => AmazonS3Builder::from_env(),
        };
        builder
            .with_endpoint(&self.settings.endpoint)
            .with_region(self.settings.signing_region())
            .with_bucket_name(bucket)
            .with_virtual_hosted_style_request(false)
            .with_allow_http(self.settings.endpoint.starts_with("http://"))
    }

    fn client(&self, bucket: &str) -> Result<Arc<AmazonS3>, StoreError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(bucket) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(
            self.builder(bucket)
                .build()
                .map_err(|err| StoreError::Unavailable(format!("cannot build S3 client for `{bucket}`: {err}")))?,
        );
        clients.insert(bucket.to_owned(), Arc::clone(&client));
        Ok(client)
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("settings", &self.settings)
            .field("buckets", &self.clients.lock().len())
            .finish()
    }
}

fn object_path(location: &ObjectLocation) -> Result<Path, StoreError> {
    Path::parse(location.key.trim_start_matches('/'))
        .map_err(|err| StoreError::Unavailable(format!("invalid object key `{}`: {err}", location.key)))
}

fn store_error(location: &ObjectLocation, err: object_store::Error) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound(location.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn stat_object(&self, location: &ObjectLocation) -> Result<ObjectStat, StoreError> {
        let client = self.client(&location.bucket)?;
        let meta = client
            .head(&object_path(location)?)
            .await
            .map_err(|err| store_error(location, err))?;
        let change_token = meta
            .e_tag
            .as_deref()
            .map(|tag| tag.trim_matches('"').to_owned())
            .unwrap_or_else(|| meta.last_modified.to_rfc3339());
        Ok(ObjectStat {
            change_token,
            last_modified: Some(meta.last_modified),
        })
    }

    async fn get_object(&self, location: &ObjectLocation) -> Result<Bytes, StoreError> {
        let client = self.client(&location.bucket)?;
        client
            .get(&object_path(location)?)
            .await
            .map_err(|err| store_error(location, err))?
            .bytes()
            .await
            .map_err(|err| store_error(location, err))
    }
}
