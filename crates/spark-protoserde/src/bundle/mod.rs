//! 描述符集（schema bundle）的解析与链接。
//!
//! 入口为 [`load`]：原始字节 → [`raw`] 模型 → [`linker`] → 不可变的 [`SchemaBundle`]。

pub mod linker;
pub mod raw;
pub mod types;

pub use linker::link;
pub use raw::{
    RawEnum, RawField, RawFile, RawKind, RawLabel, RawMessage, Syntax, decode_descriptor_set,
    encode_descriptor_set,
};
pub use types::{
    Cardinality, EnumId, EnumType, ExclusivityGroup, Field, FieldKind, FileDef, FileId,
    MessageHandle, MessageId, MessageType, SchemaBundle,
};

use crate::error::BundleLinkError;

/// 解析并链接一段 `FileDescriptorSet` 编码。
pub fn load(bytes: &[u8]) -> Result<SchemaBundle, BundleLinkError> {
    link(decode_descriptor_set(bytes)?)
}
