//! 宿主识别的配置键与默认值。

use std::time::Duration;

/// 本地描述符集文件路径。
pub const DESCRIPTOR_FILE: &str = "descriptor.value.file";
/// 本地描述符集的复查间隔（秒）。
pub const DESCRIPTOR_LOCAL_REFRESH_SECONDS: &str = "descriptor.value.local.refresh.interval.seconds";

pub const STORE_ENDPOINT: &str = "s3.endpoint";
pub const STORE_REGION: &str = "s3.region";
pub const STORE_SECURE: &str = "s3.secure";
/// 静态访问密钥；与 [`STORE_SECRET_KEY`] 成对出现，缺省时回落到运行环境的凭证链。
pub const STORE_ACCESS_KEY: &str = "s3.auth.access.key";
pub const STORE_SECRET_KEY: &str = "s3.auth.secret.key";

pub const DESCRIPTOR_BUCKET: &str = "descriptor.value.s3.bucket";
pub const DESCRIPTOR_OBJECT_KEY: &str = "descriptor.value.s3.object.key";
pub const DESCRIPTOR_REMOTE_REFRESH_SECONDS: &str = "descriptor.value.s3.refresh.interval.seconds";

/// 本地通道映射（通道 → 类型名）。
pub const LOCAL_ROUTES: &str = "channel.mapping.value.local";
pub const ROUTES_BUCKET: &str = "channel.mapping.value.s3.bucket";
pub const ROUTES_OBJECT_KEY: &str = "channel.mapping.value.s3.object.key";
pub const ROUTES_REFRESH_SECONDS: &str = "channel.mapping.value.s3.refresh.interval.seconds";

pub const DEFAULT_TYPE: &str = "message.value.default.type";
pub const STRICT_FIELD_PRESENCE: &str = "serialization.strict.field.presence";

pub const BACKGROUND_REFRESH_SECONDS: &str = "refresh.background.interval.seconds";
pub const SHUTDOWN_TIMEOUT_SECONDS: &str = "refresh.background.shutdown.timeout.seconds";

pub const DEFAULT_LOCAL_REFRESH: Duration = Duration::from_secs(60);
pub const DEFAULT_REMOTE_REFRESH: Duration = Duration::from_secs(3600);
/// 未配置 `s3.region` 时用于签名的区域。
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
