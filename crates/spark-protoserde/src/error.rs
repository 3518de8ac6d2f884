//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为动态编解码链路的全部失败路径提供集中定义：启动期配置、描述符链接、远端拉取、
//!   单次编解码与路由查找各自独立成类，方便调用方区分“致命”与“单次可恢复”。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，可直接交给 `anyhow` 等上层框架；
//! - 约束类错误（严格字段、互斥组、必填字段）一次性列出全部违规项，而非首个即止；
//! - 顶层 [`Error`] 通过 `#[from]` 聚合各子错误，使 `?` 在宿主门面中自然传播。

use std::fmt;

use thiserror::Error;

use crate::codec::CodecError;
use crate::source::StoreError;
use crate::validation::ValidationReport;

/// 便捷别名，默认错误为 [`Error`]。
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 编解码宿主对外暴露的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：一个枚举覆盖宿主生命周期内的全部失败类别，运维可按变体区分告警级别。
/// - **契约 (What)**：
///   - `Configuration` / `BundleLink` 仅在启动（冷加载）时致命；
///   - `RemoteFetch` 仅在没有任何历史快照时才会冒泡；
///   - `Decode` / `Encode` / `RouteNotFound` 只影响单次调用。
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    BundleLink(#[from] BundleLinkError),
    #[error(transparent)]
    RemoteFetch(#[from] RemoteFetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    RouteNotFound(#[from] RouteNotFoundError),
}

/// 配置缺失或取值非法。
///
/// - **意图 (Why)**：在启动阶段尽早失败，避免带着残缺配置进入消息路径。
/// - **契约 (What)**：`key` 为出问题的配置键（或调度器等构造参数名），`detail` 为可读原因。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid configuration `{key}`: {detail}")]
pub struct ConfigurationError {
    pub key: String,
    pub detail: String,
}

impl ConfigurationError {
    pub fn missing(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            detail: "required value is missing".to_owned(),
        }
    }

    pub fn invalid(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            detail: detail.into(),
        }
    }
}

/// 无法解析依赖的单个文件。
///
/// - `missing`：包内根本不存在的依赖；
/// - `blocked_by`：存在于包内、但自身也未能链接的依赖（环，或间接缺失）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedFile {
    pub name: String,
    pub missing: Vec<String>,
    pub blocked_by: Vec<String>,
}

impl fmt::Display for UnresolvedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.missing.is_empty() {
            write!(f, " (missing: {})", self.missing.join(", "))?;
        }
        if !self.blocked_by.is_empty() {
            write!(f, " (waiting on: {})", self.blocked_by.join(", "))?;
        }
        Ok(())
    }
}

/// 描述符集无法链接为完整的类型图。
///
/// # 教案式说明
/// - **意图 (Why)**：冷加载阶段的致命错误；刷新阶段则由缓存降级吸收，继续服务旧快照。
/// - **契约 (What)**：`Unresolved` 列出每一个未能链接的文件及其缺失依赖，与输入顺序无关。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BundleLinkError {
    /// 原始字节不是合法的描述符集编码。
    #[error("malformed descriptor set: {0}")]
    Malformed(String),
    /// 同名文件出现多次。
    #[error("descriptor set contains file `{0}` more than once")]
    DuplicateFile(String),
    /// 存在缺失依赖或依赖环。
    #[error("unresolved files: {}", display_unresolved(.files))]
    Unresolved { files: Vec<UnresolvedFile> },
    /// 文件内的定义自身非法（未知类型引用、重复全名等）。
    #[error("invalid definition in `{file}`: {detail}")]
    InvalidDefinition { file: String, detail: String },
}

fn display_unresolved(files: &[UnresolvedFile]) -> String {
    files
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl BundleLinkError {
    pub(crate) fn invalid(file: &str, detail: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            file: file.to_owned(),
            detail: detail.into(),
        }
    }
}

/// 远端拉取失败的具体阶段。
#[derive(Debug, Error)]
pub enum FetchCause {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Link(#[from] BundleLinkError),
    #[error("unreadable payload: {0}")]
    Payload(String),
}

/// 远端对象拉取或解析失败，且没有可回退的历史快照。
#[derive(Debug, Error)]
#[error("failed to load `{location}`: {cause}")]
pub struct RemoteFetchError {
    pub location: String,
    #[source]
    pub cause: FetchCause,
}

/// 二进制载荷无法按目标类型解析。
#[derive(Debug, Error)]
#[error("cannot decode `{message_type}` on channel `{channel}`: {detail}")]
pub struct DecodeError {
    pub channel: String,
    pub message_type: String,
    pub detail: String,
}

/// 编码失败的具体原因：JSON 形态错误或约束违规。
#[derive(Debug, Error)]
pub enum EncodeFailure {
    #[error(transparent)]
    Malformed(#[from] CodecError),
    #[error(transparent)]
    Violations(#[from] ValidationReport),
}

/// JSON 文本无法编码为目标类型。
#[derive(Debug, Error)]
#[error("cannot encode `{message_type}` on channel `{channel}`: {failure}")]
pub struct EncodeError {
    pub channel: String,
    pub message_type: String,
    #[source]
    pub failure: EncodeFailure,
}

impl EncodeError {
    /// 若失败源于约束校验，返回完整的违规报告。
    pub fn violations(&self) -> Option<&ValidationReport> {
        match &self.failure {
            EncodeFailure::Violations(report) => Some(report),
            EncodeFailure::Malformed(_) => None,
        }
    }
}

/// 通道无法映射到任何消息类型。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouteNotFoundError {
    /// 通道未映射且未配置默认类型。
    #[error("channel `{channel}` has no message type and no default type is configured")]
    Unmapped { channel: String },
    /// 路由器只服务 value 侧，key 侧请求被显式拒绝。
    #[error("channel `{channel}`: {target} payloads are not routable")]
    UnsupportedTarget { channel: String, target: String },
}
