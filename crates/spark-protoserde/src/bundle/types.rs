//! 链接后的类型图。
//!
//! 所有跨引用都是 arena 下标（[`FileId`]、[`MessageId`]、[`EnumId`]），链接完成后不再有字符串查找；
//! [`SchemaBundle`] 一经构建即不可变，通过 `Arc` 在读者之间共享。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use super::raw::Syntax;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub(crate) usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub(crate) usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumId(pub(crate) usize);

/// 字段的值类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Bool,
    String,
    Bytes,
    Enum(EnumId),
    Message(MessageId),
}

impl FieldKind {
    /// 可使用 packed 编码的标量（数值、布尔、枚举）。
    pub fn is_packable(self) -> bool {
        !matches!(self, Self::String | Self::Bytes | Self::Message(_))
    }

    /// 能作为 map 键的类型。
    pub fn is_map_key(self) -> bool {
        !matches!(
            self,
            Self::Double | Self::Float | Self::Bytes | Self::Enum(_) | Self::Message(_)
        )
    }
}

/// 字段基数。`Map` 的值类型记录在字段自身的 [`Field::kind`] 上。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    Singular,
    Repeated,
    Map { key: FieldKind },
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub json_name: String,
    pub number: u32,
    pub kind: FieldKind,
    pub cardinality: Cardinality,
    /// 所属互斥组在 [`MessageType::groups`] 中的下标。
    pub group: Option<usize>,
    pub required: bool,
    pub packed: bool,
    /// 是否区分“未设置”与“默认值”。
    pub has_presence: bool,
}

impl Field {
    pub fn is_repeated(&self) -> bool {
        matches!(self.cardinality, Cardinality::Repeated)
    }

    pub fn is_map(&self) -> bool {
        matches!(self.cardinality, Cardinality::Map { .. })
    }
}

/// 互斥组（oneof）。
///
/// - **合成组**（`synthetic = true`）：编译器为 proto3 `optional` 生成，恰含一个成员，零个被设置合法。
/// - **声明组**：作者书写的备选项集合，必须恰好设置一个成员。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExclusivityGroup {
    pub name: String,
    /// 成员字段在 [`MessageType::fields`] 中的下标。
    pub members: Vec<usize>,
    pub synthetic: bool,
}

#[derive(Clone, Debug)]
pub struct MessageType {
    pub full_name: String,
    pub name: String,
    pub file: FileId,
    pub syntax: Syntax,
    pub fields: Vec<Field>,
    pub groups: Vec<ExclusivityGroup>,
    pub map_entry: bool,
    pub(crate) by_number: HashMap<u32, usize>,
    pub(crate) by_json_key: HashMap<String, usize>,
}

impl MessageType {
    pub fn field_by_number(&self, number: u32) -> Option<&Field> {
        self.by_number.get(&number).map(|index| &self.fields[*index])
    }

    pub(crate) fn field_index(&self, number: u32) -> Option<usize> {
        self.by_number.get(&number).copied()
    }

    /// 按 JSON 键查找字段：规范 JSON 名优先，原始字段名其次。
    pub fn field_by_json_key(&self, key: &str) -> Option<(usize, &Field)> {
        self.by_json_key
            .get(key)
            .map(|index| (*index, &self.fields[*index]))
    }
}

#[derive(Clone, Debug)]
pub struct EnumType {
    pub full_name: String,
    pub file: FileId,
    pub values: Vec<(String, i32)>,
}

impl EnumType {
    pub fn name_of(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, value)| *value == number)
            .map(|(name, _)| name.as_str())
    }

    pub fn number_of(&self, name: &str) -> Option<i32> {
        self.values
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, number)| *number)
    }

    /// 默认值：首个声明值（proto3 要求其为 0）。
    pub fn default_number(&self) -> i32 {
        self.values.first().map_or(0, |(_, number)| *number)
    }
}

#[derive(Clone, Debug)]
pub struct FileDef {
    pub name: String,
    pub package: String,
    pub syntax: Syntax,
    pub dependencies: Vec<FileId>,
    pub messages: Vec<MessageId>,
}

/// 完整链接的描述符集。
///
/// # 教案式说明
/// - **契约 (What)**：`files` 保持输入顺序；`messages` 按“文件输入顺序 → 声明顺序 → 深度优先嵌套”
///   排列，简单名回退解析以此作为确定性的遍历顺序。
/// - **并发 (How)**：构建后只读，由 `ArcSwap` 整体替换而非原地修改。
#[derive(Debug, Default)]
pub struct SchemaBundle {
    pub(crate) files: Vec<FileDef>,
    pub(crate) messages: Vec<MessageType>,
    pub(crate) enums: Vec<EnumType>,
    pub(crate) message_index: HashMap<String, MessageId>,
}

impl SchemaBundle {
    pub fn files(&self) -> &[FileDef] {
        &self.files
    }

    pub fn file(&self, id: FileId) -> &FileDef {
        &self.files[id.0]
    }

    pub fn message(&self, id: MessageId) -> &MessageType {
        &self.messages[id.0]
    }

    pub fn enumeration(&self, id: EnumId) -> &EnumType {
        &self.enums[id.0]
    }

    /// 以 bundle 顺序遍历全部消息类型（含 map entry 合成类型）。
    pub fn messages(&self) -> impl Iterator<Item = (MessageId, &MessageType)> {
        self.messages
            .iter()
            .enumerate()
            .map(|(index, message)| (MessageId(index), message))
    }

    pub fn find_message(&self, full_name: &str) -> Option<MessageId> {
        self.message_index
            .get(full_name.strip_prefix('.').unwrap_or(full_name))
            .copied()
    }

    /// 构造指向某一消息类型的句柄，句柄持有 bundle 的共享引用。
    pub fn handle(self: &Arc<Self>, full_name: &str) -> Option<MessageHandle> {
        self.find_message(full_name)
            .map(|id| MessageHandle::new(Arc::clone(self), id))
    }
}

/// 消息类型句柄：`Arc<SchemaBundle>` + 下标。
///
/// 路由表快照中的句柄与其 bundle 同生共死，刷新替换 bundle 不会使正在使用的句柄悬空。
#[derive(Clone)]
pub struct MessageHandle {
    bundle: Arc<SchemaBundle>,
    id: MessageId,
}

impl MessageHandle {
    pub fn new(bundle: Arc<SchemaBundle>, id: MessageId) -> Self {
        Self { bundle, id }
    }

    pub fn bundle(&self) -> &Arc<SchemaBundle> {
        &self.bundle
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn descriptor(&self) -> &MessageType {
        self.bundle.message(self.id)
    }

    pub fn full_name(&self) -> &str {
        &self.descriptor().full_name
    }

    /// 定义该类型的文件名。
    pub fn file_name(&self) -> &str {
        &self.bundle.file(self.descriptor().file).name
    }
}

impl PartialEq for MessageHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bundle, &other.bundle) && self.id == other.id
    }
}

impl fmt::Debug for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageHandle")
            .field(&self.full_name())
            .finish()
    }
}
