//! 描述符集的原始（未链接）模型。
//!
//! # 教案式说明
//! - **意图 (Why)**：`protoc --descriptor_set_out` 产出的 `FileDescriptorSet` 由 `prost-types`
//!   解码；这里把其中链接所需的子集规整为更窄的模型，其余字段（options、source info 等）不进入链接器。
//! - **契约 (What)**：所有类型引用仍是字符串，依赖仍是文件名；交由 [`super::linker`] 转换为
//!   索引化的类型图。未知的字段类型码或标签码、缺失文件名、越界字段号都在此处拒绝。
//! - **扩展 (How)**：同时提供构建器与 [`encode_descriptor_set`]，宿主与测试无需 `protoc` 即可
//!   构造描述符集。

use prost::Message as _;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FieldOptions, FileDescriptorProto, FileDescriptorSet, MessageOptions, OneofDescriptorProto,
};

use crate::error::BundleLinkError;

/// 文件语法版本。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Syntax {
    #[default]
    Proto2,
    Proto3,
}

impl Syntax {
    fn parse(raw: &str) -> Self {
        if raw == "proto3" { Self::Proto3 } else { Self::Proto2 }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proto2 => "proto2",
            Self::Proto3 => "proto3",
        }
    }
}

/// 字段类型（与 `FieldDescriptorProto.Type` 一一对应）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawKind {
    Double,
    Float,
    Int64,
    UInt64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    UInt32,
    Enum,
    SFixed32,
    SFixed64,
    SInt32,
    SInt64,
}

impl RawKind {
    fn from_type(kind: Type) -> Self {
        match kind {
            Type::Double => Self::Double,
            Type::Float => Self::Float,
            Type::Int64 => Self::Int64,
            Type::Uint64 => Self::UInt64,
            Type::Int32 => Self::Int32,
            Type::Fixed64 => Self::Fixed64,
            Type::Fixed32 => Self::Fixed32,
            Type::Bool => Self::Bool,
            Type::String => Self::String,
            Type::Group => Self::Group,
            Type::Message => Self::Message,
            Type::Bytes => Self::Bytes,
            Type::Uint32 => Self::UInt32,
            Type::Enum => Self::Enum,
            Type::Sfixed32 => Self::SFixed32,
            Type::Sfixed64 => Self::SFixed64,
            Type::Sint32 => Self::SInt32,
            Type::Sint64 => Self::SInt64,
        }
    }

    fn to_type(self) -> Type {
        match self {
            Self::Double => Type::Double,
            Self::Float => Type::Float,
            Self::Int64 => Type::Int64,
            Self::UInt64 => Type::Uint64,
            Self::Int32 => Type::Int32,
            Self::Fixed64 => Type::Fixed64,
            Self::Fixed32 => Type::Fixed32,
            Self::Bool => Type::Bool,
            Self::String => Type::String,
            Self::Group => Type::Group,
            Self::Message => Type::Message,
            Self::Bytes => Type::Bytes,
            Self::UInt32 => Type::Uint32,
            Self::Enum => Type::Enum,
            Self::SFixed32 => Type::Sfixed32,
            Self::SFixed64 => Type::Sfixed64,
            Self::SInt32 => Type::Sint32,
            Self::SInt64 => Type::Sint64,
        }
    }
}

/// 字段基数标签。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RawLabel {
    #[default]
    Optional,
    Required,
    Repeated,
}

impl RawLabel {
    fn from_label(label: Label) -> Self {
        match label {
            Label::Optional => Self::Optional,
            Label::Required => Self::Required,
            Label::Repeated => Self::Repeated,
        }
    }

    fn to_label(self) -> Label {
        match self {
            Self::Optional => Label::Optional,
            Self::Required => Label::Required,
            Self::Repeated => Label::Repeated,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawField {
    pub name: String,
    pub number: u32,
    pub label: RawLabel,
    pub kind: RawKind,
    pub type_name: Option<String>,
    pub json_name: Option<String>,
    pub oneof_index: Option<u32>,
    pub proto3_optional: bool,
    pub packed: Option<bool>,
}

impl RawField {
    pub fn new(name: impl Into<String>, number: u32, kind: RawKind) -> Self {
        Self {
            name: name.into(),
            number,
            label: RawLabel::Optional,
            kind,
            type_name: None,
            json_name: None,
            oneof_index: None,
            proto3_optional: false,
            packed: None,
        }
    }

    /// 引用消息类型的字段；`type_name` 可为 `.pkg.Type` 绝对名或相对名。
    pub fn message(name: impl Into<String>, number: u32, type_name: impl Into<String>) -> Self {
        let mut field = Self::new(name, number, RawKind::Message);
        field.type_name = Some(type_name.into());
        field
    }

    pub fn enumeration(name: impl Into<String>, number: u32, type_name: impl Into<String>) -> Self {
        let mut field = Self::new(name, number, RawKind::Enum);
        field.type_name = Some(type_name.into());
        field
    }

    pub fn repeated(mut self) -> Self {
        self.label = RawLabel::Repeated;
        self
    }

    pub fn required(mut self) -> Self {
        self.label = RawLabel::Required;
        self
    }

    pub fn json_name(mut self, json_name: impl Into<String>) -> Self {
        self.json_name = Some(json_name.into());
        self
    }

    pub fn packed(mut self, packed: bool) -> Self {
        self.packed = Some(packed);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMessage {
    pub name: String,
    pub fields: Vec<RawField>,
    pub nested: Vec<RawMessage>,
    pub enums: Vec<RawEnum>,
    pub oneofs: Vec<String>,
    pub map_entry: bool,
}

impl RawMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, field: RawField) -> Self {
        self.fields.push(field);
        self
    }

    /// 声明一个作者书写的 oneof（互斥组），成员按给定顺序追加。
    pub fn oneof(mut self, name: impl Into<String>, members: impl IntoIterator<Item = RawField>) -> Self {
        let index = self.oneofs.len() as u32;
        self.oneofs.push(name.into());
        for mut member in members {
            member.oneof_index = Some(index);
            self.fields.push(member);
        }
        self
    }

    /// proto3 `optional` 字段：编译器为其生成名为 `_<field>` 的合成 oneof。
    pub fn optional(mut self, mut field: RawField) -> Self {
        let index = self.oneofs.len() as u32;
        self.oneofs.push(format!("_{}", field.name));
        field.oneof_index = Some(index);
        field.proto3_optional = true;
        self.fields.push(field);
        self
    }

    /// map 字段：按 protoc 的约定生成 `<CamelName>Entry` 嵌套类型与 repeated 引用。
    pub fn map_field(mut self, name: impl Into<String>, number: u32, key: RawKind, value: RawField) -> Self {
        let name = name.into();
        let entry_name = format!("{}Entry", camel_case(&name));
        let mut value = value;
        value.name = "value".to_owned();
        value.number = 2;
        value.label = RawLabel::Optional;
        let entry = RawMessage {
            name: entry_name.clone(),
            fields: vec![RawField::new("key", 1, key), value],
            map_entry: true,
            ..RawMessage::default()
        };
        self.nested.push(entry);
        self.fields
            .push(RawField::message(name, number, entry_name).repeated());
        self
    }

    pub fn nested(mut self, message: RawMessage) -> Self {
        self.nested.push(message);
        self
    }

    pub fn enumeration(mut self, enumeration: RawEnum) -> Self {
        self.enums.push(enumeration);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawEnum {
    pub name: String,
    pub values: Vec<(String, i32)>,
}

impl RawEnum {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, name: impl Into<String>, number: i32) -> Self {
        self.values.push((name.into(), number));
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawFile {
    pub name: String,
    pub package: String,
    pub dependencies: Vec<String>,
    pub messages: Vec<RawMessage>,
    pub enums: Vec<RawEnum>,
    pub syntax: Syntax,
}

impl RawFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn message(mut self, message: RawMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn enumeration(mut self, enumeration: RawEnum) -> Self {
        self.enums.push(enumeration);
        self
    }
}

fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

// --- prost-types ⇄ 原始模型 ---------------------------------------------------

fn malformed(detail: impl Into<String>) -> BundleLinkError {
    BundleLinkError::Malformed(detail.into())
}

/// 解析 `FileDescriptorSet` 编码，保持文件的输入顺序。
///
/// 解码本身（含未知字段与嵌套 group 的跳过、递归深度上限）由 `prost` 完成，截断或恶意输入
/// 一律表现为 [`BundleLinkError::Malformed`]。
pub fn decode_descriptor_set(bytes: &[u8]) -> Result<Vec<RawFile>, BundleLinkError> {
    let set = FileDescriptorSet::decode(bytes).map_err(|err| malformed(err.to_string()))?;
    set.file.into_iter().map(RawFile::try_from).collect()
}

/// 将原始文件列表编码为 `FileDescriptorSet`。
pub fn encode_descriptor_set(files: &[RawFile]) -> Vec<u8> {
    FileDescriptorSet {
        file: files.iter().map(FileDescriptorProto::from).collect(),
    }
    .encode_to_vec()
}

impl TryFrom<FileDescriptorProto> for RawFile {
    type Error = BundleLinkError;

    fn try_from(file: FileDescriptorProto) -> Result<Self, Self::Error> {
        let name = file
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| malformed("file descriptor without a name"))?;
        let syntax = file.syntax.as_deref().map_or(Syntax::Proto2, Syntax::parse);
        Ok(Self {
            package: file.package.unwrap_or_default(),
            dependencies: file.dependency,
            messages: file
                .message_type
                .into_iter()
                .map(|message| RawMessage::try_from(message).map_err(|err| err.in_file(&name)))
                .collect::<Result<_, _>>()?,
            enums: file.enum_type.into_iter().map(RawEnum::from).collect(),
            syntax,
            name,
        })
    }
}

/// 单个消息的规整失败原因；文件名在上一层补全。
pub struct MessageFault(String);

impl MessageFault {
    fn in_file(self, file: &str) -> BundleLinkError {
        malformed(format!("{file}: {}", self.0))
    }
}

impl TryFrom<DescriptorProto> for RawMessage {
    type Error = MessageFault;

    fn try_from(message: DescriptorProto) -> Result<Self, Self::Error> {
        let name = message.name.unwrap_or_default();
        let fields = message
            .field
            .into_iter()
            .map(|field| raw_field(&name, field))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            fields,
            nested: message
                .nested_type
                .into_iter()
                .map(RawMessage::try_from)
                .collect::<Result<_, _>>()?,
            enums: message.enum_type.into_iter().map(RawEnum::from).collect(),
            oneofs: message
                .oneof_decl
                .into_iter()
                .map(|oneof| oneof.name.unwrap_or_default())
                .collect(),
            map_entry: message
                .options
                .as_ref()
                .is_some_and(MessageOptions::map_entry),
            name,
        })
    }
}

fn raw_field(owner: &str, field: FieldDescriptorProto) -> Result<RawField, MessageFault> {
    let name = field.name.clone().unwrap_or_default();
    let fault = |detail: String| MessageFault(format!("`{owner}.{name}` {detail}"));

    let number = field
        .number
        .and_then(|number| u32::try_from(number).ok())
        .filter(|number| *number > 0)
        .ok_or_else(|| fault(format!("has an invalid field number {:?}", field.number)))?;
    let kind = match field.r#type {
        Some(code) => Type::try_from(code)
            .map(RawKind::from_type)
            .map_err(|_| fault(format!("has unknown field type {code}")))?,
        // 仅有 type_name 而无 type 时，无法区分消息与枚举；protoc 的输出不会出现这种情形
        None => return Err(fault("has no type".to_owned())),
    };
    let label = match field.label {
        Some(code) => Label::try_from(code)
            .map(RawLabel::from_label)
            .map_err(|_| fault(format!("has unknown label {code}")))?,
        None => RawLabel::Optional,
    };
    let oneof_index = field
        .oneof_index
        .map(|index| u32::try_from(index).map_err(|_| fault(format!("has oneof index {index}"))))
        .transpose()?;

    Ok(RawField {
        number,
        label,
        kind,
        type_name: field.type_name,
        json_name: field.json_name,
        oneof_index,
        proto3_optional: field.proto3_optional.unwrap_or(false),
        packed: field.options.as_ref().and_then(|options| options.packed),
        name,
    })
}

impl From<EnumDescriptorProto> for RawEnum {
    fn from(enumeration: EnumDescriptorProto) -> Self {
        Self {
            name: enumeration.name.unwrap_or_default(),
            values: enumeration
                .value
                .into_iter()
                .map(|value| (value.name.unwrap_or_default(), value.number.unwrap_or_default()))
                .collect(),
        }
    }
}

impl From<&RawFile> for FileDescriptorProto {
    fn from(file: &RawFile) -> Self {
        Self {
            name: Some(file.name.clone()),
            package: (!file.package.is_empty()).then(|| file.package.clone()),
            dependency: file.dependencies.clone(),
            message_type: file.messages.iter().map(DescriptorProto::from).collect(),
            enum_type: file.enums.iter().map(EnumDescriptorProto::from).collect(),
            syntax: Some(file.syntax.as_str().to_owned()),
            ..Self::default()
        }
    }
}

impl From<&RawMessage> for DescriptorProto {
    fn from(message: &RawMessage) -> Self {
        Self {
            name: Some(message.name.clone()),
            field: message.fields.iter().map(FieldDescriptorProto::from).collect(),
            nested_type: message.nested.iter().map(DescriptorProto::from).collect(),
            enum_type: message.enums.iter().map(EnumDescriptorProto::from).collect(),
            oneof_decl: message
                .oneofs
                .iter()
                .map(|name| OneofDescriptorProto {
                    name: Some(name.clone()),
                    ..OneofDescriptorProto::default()
                })
                .collect(),
            options: message.map_entry.then(|| MessageOptions {
                map_entry: Some(true),
                ..MessageOptions::default()
            }),
            ..Self::default()
        }
    }
}

impl From<&RawField> for FieldDescriptorProto {
    fn from(field: &RawField) -> Self {
        let mut proto = Self {
            name: Some(field.name.clone()),
            number: i32::try_from(field.number).ok(),
            type_name: field.type_name.clone(),
            oneof_index: field.oneof_index.and_then(|index| i32::try_from(index).ok()),
            json_name: field.json_name.clone(),
            options: field.packed.map(|packed| FieldOptions {
                packed: Some(packed),
                ..FieldOptions::default()
            }),
            proto3_optional: field.proto3_optional.then_some(true),
            ..Self::default()
        };
        proto.set_label(field.label.to_label());
        proto.set_type(field.kind.to_type());
        proto
    }
}

impl From<&RawEnum> for EnumDescriptorProto {
    fn from(enumeration: &RawEnum) -> Self {
        Self {
            name: Some(enumeration.name.clone()),
            value: enumeration
                .values
                .iter()
                .map(|(name, number)| EnumValueDescriptorProto {
                    name: Some(name.clone()),
                    number: Some(*number),
                    ..EnumValueDescriptorProto::default()
                })
                .collect(),
            ..Self::default()
        }
    }
}
