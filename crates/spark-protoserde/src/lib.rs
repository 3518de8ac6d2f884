//! # spark-protoserde
//!
//! ## 定位（Why）
//! - 在运行时依据一份可热更新的 Protobuf 描述符集，把消息在二进制与 JSON 之间互转；
//!   无需为每个消息类型生成代码，也无需重启即可接纳新 schema 与新的通道映射。
//!
//! ## 组成（What）
//! - [`bundle`]：描述符集解析与按依赖拓扑链接，产出不可变的 [`bundle::SchemaBundle`]；
//! - [`source`]：对象存储抽象与自适应缓存（元数据比对后才下载，失败时继续服务旧快照）；
//! - [`scheduler`]：后台周期刷新，单轮失败相互隔离；
//! - [`routing`]：通道 → 消息类型，本地覆盖远端，支持默认类型；
//! - [`codec`] 与 [`validation`]：动态消息的二进制 / JSON 编解码，以及严格字段、互斥组、必填约束；
//! - [`configuration`] 与 [`host`]：配置解析和面向宿主的 `configure / serializer / deserializer` 门面；
//! - [`observability`]：可选的 `tracing` 订阅者安装。
//!
//! ## 并发模型（How）
//! - 共享状态（缓存快照、路由表、当前 bundle）一律“旁路构建、`ArcSwap` 整体发布”，读路径不加锁；
//! - 网络 I/O 只发生在缓存慢路径的互斥闸门内。

pub mod bundle;
pub mod codec;
pub mod configuration;
pub mod error;
pub mod host;
pub mod observability;
pub mod routing;
pub mod scheduler;
pub mod source;
pub mod validation;

pub use bundle::{MessageHandle, SchemaBundle};
pub use codec::{CodecError, DynamicMessage, MessageCodec, Value};
pub use configuration::{MapResolver, PropertyResolver, SerdeSettings, TomlResolver};
pub use error::{
    BundleLinkError, ConfigurationError, DecodeError, EncodeError, Error, RemoteFetchError, Result,
    RouteNotFoundError,
};
pub use host::{ChannelDeserializer, ChannelSerializer, Deserialized, ProtoSerde};
pub use routing::{RouteDiff, RouteTable, Router, Target};
pub use scheduler::{JobFn, RefreshJob, RefreshScheduler, SchedulerStats};
pub use source::{AdaptiveCache, ObjectLocation, ObjectStore};
pub use validation::{ConstraintValidator, ValidationReport, Violation};
