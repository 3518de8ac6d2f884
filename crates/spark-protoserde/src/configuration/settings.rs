use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use super::PropertyResolver;
use super::keys;
use crate::error::ConfigurationError;
use crate::source::ObjectLocation;

/// 远端对象存储连接参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemoteStoreSettings {
    /// 已按 `secure` 规范化的端点（始终带 scheme）。
    pub endpoint: String,
    pub region: Option<String>,
    pub secure: bool,
    /// `None` 时由环境凭证链（`AWS_ACCESS_KEY_ID` 等）提供签名密钥。
    #[serde(skip)]
    pub credentials: Option<StoreCredentials>,
}

impl RemoteStoreSettings {
    /// 签名使用的区域，缺省为 [`keys::DEFAULT_REGION`]。
    pub fn signing_region(&self) -> &str {
        self.region.as_deref().unwrap_or(keys::DEFAULT_REGION)
    }
}

/// 静态访问密钥对。`Debug` 输出不含密钥内容。
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// 描述符集来源：远端优先，其次本地文件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorSource {
    LocalFile {
        path: PathBuf,
        refresh_interval: Duration,
    },
    Remote {
        location: ObjectLocation,
        refresh_interval: Duration,
    },
}

impl DescriptorSource {
    pub fn refresh_interval(&self) -> Duration {
        match self {
            DescriptorSource::LocalFile { refresh_interval, .. }
            | DescriptorSource::Remote { refresh_interval, .. } => *refresh_interval,
        }
    }
}

/// 远端路由表的位置。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRoutes {
    pub location: ObjectLocation,
    pub refresh_interval: Duration,
}

/// 宿主的完整强类型设置。
///
/// # 教案式说明
/// - **意图 (Why)**：把“键是否存在、文本能否解析”的全部判断集中在启动期，消息路径只面对已校验的值。
/// - **契约 (What)**：
///   - 同时配置了端点与描述符的桶、键时走远端，否则要求 `descriptor.value.file`；
///   - 桶与键只配其一视为非法，而不是静默回退到本地；
///   - 所有间隔必须为正整数秒；布尔值只接受 `true` / `false`；
///   - 后台刷新间隔缺省取各来源间隔的最小值。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerdeSettings {
    pub store: Option<RemoteStoreSettings>,
    pub descriptor: DescriptorSource,
    pub remote_routes: Option<RemoteRoutes>,
    pub local_routes: BTreeMap<String, String>,
    pub default_type: Option<String>,
    pub strict_field_presence: bool,
    pub background_refresh: Duration,
    pub shutdown_timeout: Duration,
}

impl SerdeSettings {
    pub fn from_resolver(resolver: &dyn PropertyResolver) -> Result<Self, ConfigurationError> {
        let store = match resolver.property(keys::STORE_ENDPOINT) {
            Some(endpoint) => {
                let secure = boolean(resolver, keys::STORE_SECURE, true)?;
                Some(RemoteStoreSettings {
                    endpoint: normalize_endpoint(&endpoint, secure),
                    region: resolver.property(keys::STORE_REGION),
                    secure,
                    credentials: credentials(resolver)?,
                })
            }
            None => None,
        };

        let remote_bundle = location(resolver, keys::DESCRIPTOR_BUCKET, keys::DESCRIPTOR_OBJECT_KEY)?;
        let descriptor = match (remote_bundle, store.is_some()) {
            (Some(location), true) => DescriptorSource::Remote {
                location,
                refresh_interval: seconds(
                    resolver,
                    keys::DESCRIPTOR_REMOTE_REFRESH_SECONDS,
                    keys::DEFAULT_REMOTE_REFRESH,
                )?,
            },
            _ => match resolver.property(keys::DESCRIPTOR_FILE) {
                Some(path) => DescriptorSource::LocalFile {
                    path: PathBuf::from(path),
                    refresh_interval: seconds(
                        resolver,
                        keys::DESCRIPTOR_LOCAL_REFRESH_SECONDS,
                        keys::DEFAULT_LOCAL_REFRESH,
                    )?,
                },
                None => return Err(ConfigurationError::missing(keys::DESCRIPTOR_FILE)),
            },
        };

        let remote_routes = match location(resolver, keys::ROUTES_BUCKET, keys::ROUTES_OBJECT_KEY)? {
            Some(location) if store.is_some() => Some(RemoteRoutes {
                location,
                refresh_interval: seconds(resolver, keys::ROUTES_REFRESH_SECONDS, keys::DEFAULT_REMOTE_REFRESH)?,
            }),
            Some(_) => return Err(ConfigurationError::missing(keys::STORE_ENDPOINT)),
            None => None,
        };

        let source_minimum = remote_routes
            .as_ref()
            .map(|routes| routes.refresh_interval)
            .into_iter()
            .fold(descriptor.refresh_interval(), Duration::min);

        Ok(Self {
            store,
            descriptor,
            remote_routes,
            local_routes: resolver.map_property(keys::LOCAL_ROUTES).unwrap_or_default(),
            default_type: resolver.property(keys::DEFAULT_TYPE),
            strict_field_presence: boolean(resolver, keys::STRICT_FIELD_PRESENCE, false)?,
            background_refresh: seconds(resolver, keys::BACKGROUND_REFRESH_SECONDS, source_minimum)?,
            shutdown_timeout: seconds(resolver, keys::SHUTDOWN_TIMEOUT_SECONDS, keys::DEFAULT_SHUTDOWN_TIMEOUT)?,
        })
    }
}

/// 端点规范化：`secure=false` 时把 `https://` 降为 `http://`；缺少 scheme 时按 `secure` 补齐。
pub fn normalize_endpoint(raw: &str, secure: bool) -> String {
    let raw = raw.trim().trim_end_matches('/');
    if let Some(rest) = raw.strip_prefix("https://") {
        return if secure {
            raw.to_owned()
        } else {
            format!("http://{rest}")
        };
    }
    if raw.starts_with("http://") {
        return raw.to_owned();
    }
    let scheme = if secure { "https" } else { "http" };
    format!("{scheme}://{raw}")
}

fn location(
    resolver: &dyn PropertyResolver,
    bucket_key: &str,
    object_key: &str,
) -> Result<Option<ObjectLocation>, ConfigurationError> {
    match (resolver.property(bucket_key), resolver.property(object_key)) {
        (Some(bucket), Some(key)) => Ok(Some(ObjectLocation::new(bucket, key))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigurationError::invalid(
            object_key,
            format!("must be set together with `{bucket_key}`"),
        )),
        (None, Some(_)) => Err(ConfigurationError::invalid(
            bucket_key,
            format!("must be set together with `{object_key}`"),
        )),
    }
}

fn credentials(resolver: &dyn PropertyResolver) -> Result<Option<StoreCredentials>, ConfigurationError> {
    match (
        resolver.property(keys::STORE_ACCESS_KEY),
        resolver.property(keys::STORE_SECRET_KEY),
    ) {
        (Some(access_key), Some(secret_key)) => Ok(Some(StoreCredentials { access_key, secret_key })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigurationError::invalid(
            keys::STORE_SECRET_KEY,
            format!("must be set together with `{}`", keys::STORE_ACCESS_KEY),
        )),
        (None, Some(_)) => Err(ConfigurationError::invalid(
            keys::STORE_ACCESS_KEY,
            format!("must be set together with `{}`", keys::STORE_SECRET_KEY),
        )),
    }
}

fn seconds(resolver: &dyn PropertyResolver, key: &str, default: Duration) -> Result<Duration, ConfigurationError> {
    let Some(raw) = resolver.property(key) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigurationError::invalid(key, "must be a positive number of seconds")),
        Ok(value) => Ok(Duration::from_secs(value)),
        Err(_) => Err(ConfigurationError::invalid(key, format!("`{raw}` is not a whole number of seconds"))),
    }
}

fn boolean(resolver: &dyn PropertyResolver, key: &str, default: bool) -> Result<bool, ConfigurationError> {
    match resolver.property(key).as_deref() {
        None => Ok(default),
        Some(raw) if raw.eq_ignore_ascii_case("true") => Ok(true),
        Some(raw) if raw.eq_ignore_ascii_case("false") => Ok(false),
        Some(raw) => Err(ConfigurationError::invalid(key, format!("`{raw}` is not `true` or `false`"))),
    }
}
