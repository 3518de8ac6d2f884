use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::runtime::SerdeRuntime;
use crate::error::{DecodeError, EncodeError, Result};
use crate::routing::Target;

/// 元数据键：消息类型全名。
pub const METADATA_MESSAGE_TYPE: &str = "messageType";
/// 元数据键：定义该类型的文件名。
pub const METADATA_FILE: &str = "file";

/// 绑定到单个通道的 JSON → 二进制序列化器。
///
/// 路由在每次调用时解析，因此刷新后的路由表立即生效。
#[derive(Clone)]
pub struct ChannelSerializer {
    runtime: Arc<SerdeRuntime>,
    channel: String,
}

impl ChannelSerializer {
    pub(crate) fn new(runtime: Arc<SerdeRuntime>, channel: String) -> Self {
        Self { runtime, channel }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn serialize(&self, text: &str) -> Result<Vec<u8>> {
        let handle = self.runtime.router.route(&self.channel, Target::Value)?;
        let bytes = self
            .runtime
            .codec
            .encode_json(&handle, text)
            .map_err(|failure| EncodeError {
                channel: self.channel.clone(),
                message_type: handle.full_name().to_owned(),
                failure,
            })?;
        Ok(bytes)
    }
}

impl fmt::Debug for ChannelSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSerializer")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// 反序列化结果：JSON 文本与附带的类型元数据。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deserialized {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// 绑定到单个通道的二进制 → JSON 反序列化器。
#[derive(Clone)]
pub struct ChannelDeserializer {
    runtime: Arc<SerdeRuntime>,
    channel: String,
}

impl ChannelDeserializer {
    pub(crate) fn new(runtime: Arc<SerdeRuntime>, channel: String) -> Self {
        Self { runtime, channel }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<Deserialized> {
        let handle = self.runtime.router.route(&self.channel, Target::Value)?;
        let text = self
            .runtime
            .codec
            .decode_to_json(&handle, bytes)
            .map_err(|err| DecodeError {
                channel: self.channel.clone(),
                message_type: handle.full_name().to_owned(),
                detail: err.to_string(),
            })?;
        let metadata = BTreeMap::from([
            (METADATA_MESSAGE_TYPE.to_owned(), handle.full_name().to_owned()),
            (METADATA_FILE.to_owned(), handle.file_name().to_owned()),
        ]);
        Ok(Deserialized { text, metadata })
    }
}

impl fmt::Debug for ChannelDeserializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDeserializer")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
