//! 动态消息：以字段号为键的通用记录，由运行时 schema 驱动，不依赖生成代码。

use std::collections::BTreeMap;

use crate::bundle::{FieldKind, MessageId, MessageType, SchemaBundle};

/// 字段取值。枚举保存数值，名称在渲染 JSON 时再查。
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Enum(i32),
    Message(DynamicMessage),
    List(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
}

impl Value {
    /// 某一字段类型在未设置时的默认值；消息类型返回空消息。
    pub fn default_for(kind: FieldKind, bundle: &SchemaBundle) -> Value {
        match kind {
            FieldKind::Double => Value::F64(0.0),
            FieldKind::Float => Value::F32(0.0),
            FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 => Value::I32(0),
            FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => Value::I64(0),
            FieldKind::UInt32 | FieldKind::Fixed32 => Value::U32(0),
            FieldKind::UInt64 | FieldKind::Fixed64 => Value::U64(0),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::String => Value::String(String::new()),
            FieldKind::Bytes => Value::Bytes(Vec::new()),
            FieldKind::Enum(id) => Value::Enum(bundle.enumeration(id).default_number()),
            FieldKind::Message(id) => Value::Message(DynamicMessage::new(id)),
        }
    }

    /// 是否等于类型默认值（隐式存在性字段编码时据此省略）。
    pub fn is_default(&self) -> bool {
        match self {
            Value::Bool(v) => !*v,
            Value::I32(v) | Value::Enum(v) => *v == 0,
            Value::I64(v) => *v == 0,
            Value::U32(v) => *v == 0,
            Value::U64(v) => *v == 0,
            // -0.0 与 0.0 区分对待
            Value::F32(v) => v.to_bits() == 0,
            Value::F64(v) => v.to_bits() == 0,
            Value::String(v) => v.is_empty(),
            Value::Bytes(v) => v.is_empty(),
            Value::Message(_) => false,
            Value::List(v) => v.is_empty(),
            Value::Map(v) => v.is_empty(),
        }
    }
}

/// map 键；有序，保证编码与 JSON 输出稳定。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    String(String),
}

impl MapKey {
    pub(crate) fn from_value(value: Value) -> Option<MapKey> {
        Some(match value {
            Value::Bool(v) => MapKey::Bool(v),
            Value::I32(v) => MapKey::I32(v),
            Value::I64(v) => MapKey::I64(v),
            Value::U32(v) => MapKey::U32(v),
            Value::U64(v) => MapKey::U64(v),
            Value::String(v) => MapKey::String(v),
            _ => return None,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            MapKey::Bool(v) => Value::Bool(*v),
            MapKey::I32(v) => Value::I32(*v),
            MapKey::I64(v) => Value::I64(*v),
            MapKey::U32(v) => Value::U32(*v),
            MapKey::U64(v) => Value::U64(*v),
            MapKey::String(v) => Value::String(v.clone()),
        }
    }

    /// JSON 对象键形式（map 键在 JSON 中总是字符串）。
    pub fn to_json_key(&self) -> String {
        match self {
            MapKey::Bool(v) => v.to_string(),
            MapKey::I32(v) => v.to_string(),
            MapKey::I64(v) => v.to_string(),
            MapKey::U32(v) => v.to_string(),
            MapKey::U64(v) => v.to_string(),
            MapKey::String(v) => v.clone(),
        }
    }
}

/// 按字段号存储的动态消息。未出现在 `fields` 中的字段即为“未设置”。
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicMessage {
    message: MessageId,
    fields: BTreeMap<u32, Value>,
}

impl DynamicMessage {
    pub fn new(message: MessageId) -> Self {
        Self {
            message,
            fields: BTreeMap::new(),
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message
    }

    pub fn get(&self, number: u32) -> Option<&Value> {
        self.fields.get(&number)
    }

    pub fn has(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 直接写入，不处理互斥组；需要 oneof 语义时使用 [`DynamicMessage::set_field`]。
    pub fn set(&mut self, number: u32, value: Value) {
        self.fields.insert(number, value);
    }

    pub fn clear(&mut self, number: u32) -> Option<Value> {
        self.fields.remove(&number)
    }

    /// 按字段号升序遍历已设置的字段。
    pub fn fields(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.fields.iter().map(|(number, value)| (*number, value))
    }

    pub(crate) fn get_mut(&mut self, number: u32) -> Option<&mut Value> {
        self.fields.get_mut(&number)
    }

    /// 写入字段并清除同一互斥组内的其他成员（后写者胜，与线格式合并语义一致）。
    pub fn set_field(&mut self, descriptor: &MessageType, field_index: usize, value: Value) {
        let field = &descriptor.fields[field_index];
        if let Some(group) = field.group {
            for member in &descriptor.groups[group].members {
                if *member != field_index {
                    self.fields.remove(&descriptor.fields[*member].number);
                }
            }
        }
        self.fields.insert(field.number, value);
    }
}
