//! 二进制 ⇄ JSON 编解码。
//!
//! # 教案式说明
//! - **意图 (Why)**：宿主只持有运行时下发的描述符集，没有生成代码；所有转换都经由
//!   [`DynamicMessage`] 这一字段号索引的通用记录完成。
//! - **契约 (What)**：
//!   - 解码：二进制 → [`DynamicMessage`] → 规范 JSON（默认值补全）；
//!   - 编码：JSON → 严格字段校验（可选，合并前）→ 合并 → 互斥组与必填校验（合并后）→ 二进制。
//! - **并发 (How)**：[`MessageCodec`] 无内部可变状态，可被任意多个调用方共享。

pub mod binary;
pub mod json;
pub mod value;

use thiserror::Error;

pub use value::{DynamicMessage, MapKey, Value};

use crate::bundle::MessageHandle;
use crate::error::EncodeFailure;
use crate::validation::ConstraintValidator;

/// 编解码失败，附带出错字段的路径（如 `items[2].sku`）。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}", render(.path, .detail))]
pub struct CodecError {
    pub path: String,
    pub detail: String,
}

impl CodecError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            detail: detail.into(),
        }
    }

    /// 在路径前追加一段（字段名或 `[index]`）。
    pub fn within(mut self, segment: &str) -> Self {
        self.path = if self.path.is_empty() {
            segment.to_owned()
        } else if self.path.starts_with('[') {
            format!("{segment}{}", self.path)
        } else {
            format!("{segment}.{}", self.path)
        };
        self
    }
}

fn render(path: &str, detail: &str) -> String {
    if path.is_empty() {
        detail.to_owned()
    } else {
        format!("at `{path}`: {detail}")
    }
}

impl From<prost::DecodeError> for CodecError {
    fn from(err: prost::DecodeError) -> Self {
        Self::new(err.to_string())
    }
}

/// 面向单个消息类型的编解码入口。
#[derive(Clone, Debug, Default)]
pub struct MessageCodec {
    strict_field_presence: bool,
    validator: ConstraintValidator,
}

impl MessageCodec {
    pub fn new(strict_field_presence: bool) -> Self {
        Self {
            strict_field_presence,
            validator: ConstraintValidator,
        }
    }

    pub fn strict_field_presence(&self) -> bool {
        self.strict_field_presence
    }

    pub fn decode(&self, handle: &MessageHandle, bytes: &[u8]) -> Result<DynamicMessage, CodecError> {
        binary::decode_message(handle.bundle(), handle.id(), bytes)
    }

    /// 二进制 → JSON 值。
    pub fn decode_to_value(
        &self,
        handle: &MessageHandle,
        bytes: &[u8],
    ) -> Result<serde_json::Value, CodecError> {
        let message = self.decode(handle, bytes)?;
        Ok(json::to_json(handle.bundle(), &message))
    }

    /// 二进制 → JSON 文本。
    pub fn decode_to_json(&self, handle: &MessageHandle, bytes: &[u8]) -> Result<String, CodecError> {
        let value = self.decode_to_value(handle, bytes)?;
        serde_json::to_string(&value).map_err(|err| CodecError::new(err.to_string()))
    }

    /// JSON 文本 → 二进制，依次执行严格字段、合并、互斥组与必填校验。
    pub fn encode_json(&self, handle: &MessageHandle, text: &str) -> Result<Vec<u8>, EncodeFailure> {
        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|err| CodecError::new(format!("invalid JSON: {err}")))?;

        if self.strict_field_presence {
            if let serde_json::Value::Object(object) = &parsed {
                let report = self.validator.check_field_presence(handle, object);
                if !report.is_empty() {
                    return Err(EncodeFailure::Violations(report));
                }
            }
        }

        let message = json::from_json(handle.bundle(), handle.id(), &parsed)?;
        let report = self.validator.validate(handle, &message);
        if !report.is_empty() {
            return Err(EncodeFailure::Violations(report));
        }
        Ok(binary::encode_message(handle.bundle(), &message)?)
    }
}
