//! 动态消息 ⇄ Protobuf 线格式。
//!
//! 标量、字符串与字节的读写、字段头、varint 与 zigzag 全部交给 `prost::encoding`；
//! 本模块只负责按描述符把字段号分派到对应的值类型。未知字段经 `skip_field` 跳过，
//! 嵌套 group 的深度由 `prost` 的递归上限约束，嵌套消息的深度由 [`MAX_DEPTH`] 约束。

use std::collections::BTreeMap;

use bytes::Buf;
use prost::encoding::{self, DecodeContext, WireType};

use super::CodecError;
use super::value::{DynamicMessage, MapKey, Value};
use crate::bundle::{Cardinality, Field, FieldKind, MessageId, SchemaBundle};

/// 嵌套消息的最大解析深度。
pub const MAX_DEPTH: usize = 100;

fn wire_type_of(kind: FieldKind) -> WireType {
    match kind {
        FieldKind::Int32
        | FieldKind::Int64
        | FieldKind::UInt32
        | FieldKind::UInt64
        | FieldKind::SInt32
        | FieldKind::SInt64
        | FieldKind::Bool
        | FieldKind::Enum(_) => WireType::Varint,
        FieldKind::Fixed64 | FieldKind::SFixed64 | FieldKind::Double => WireType::SixtyFourBit,
        FieldKind::Fixed32 | FieldKind::SFixed32 | FieldKind::Float => WireType::ThirtyTwoBit,
        FieldKind::String | FieldKind::Bytes | FieldKind::Message(_) => WireType::LengthDelimited,
    }
}

/// 按消息类型解析二进制载荷。未知字段被跳过。
pub fn decode_message(
    bundle: &SchemaBundle,
    id: MessageId,
    bytes: &[u8],
) -> Result<DynamicMessage, CodecError> {
    let mut message = DynamicMessage::new(id);
    decode_into(bundle, bytes, &mut message, 0)?;
    Ok(message)
}

fn decode_into(
    bundle: &SchemaBundle,
    mut buf: &[u8],
    target: &mut DynamicMessage,
    depth: usize,
) -> Result<(), CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::new(format!(
            "message nesting exceeds {MAX_DEPTH} levels"
        )));
    }
    let descriptor = bundle.message(target.message_id());
    while buf.has_remaining() {
        let (number, wire_type) = encoding::decode_key(&mut buf)?;
        let Some(index) = descriptor.field_index(number) else {
            encoding::skip_field(wire_type, number, &mut buf, DecodeContext::default())?;
            continue;
        };
        let field = &descriptor.fields[index];
        decode_field(bundle, &mut buf, target, index, wire_type, depth)
            .map_err(|err| err.within(&field.json_name))?;
    }
    Ok(())
}

/// 取出一段长度前缀的载荷并前移游标。
fn take_length_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], CodecError> {
    let len = encoding::decode_varint(buf)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= buf.len())
        .ok_or_else(|| CodecError::new("length-delimited payload runs past the end of the buffer"))?;
    let remaining: &'a [u8] = *buf;
    let (body, rest) = remaining.split_at(len);
    *buf = rest;
    Ok(body)
}

fn decode_field(
    bundle: &SchemaBundle,
    buf: &mut &[u8],
    target: &mut DynamicMessage,
    index: usize,
    wire_type: WireType,
    depth: usize,
) -> Result<(), CodecError> {
    let descriptor = bundle.message(target.message_id());
    let field = &descriptor.fields[index];
    let number = field.number;
    match field.cardinality {
        Cardinality::Map { key } => {
            encoding::check_wire_type(WireType::LengthDelimited, wire_type)?;
            let entry = take_length_delimited(buf)?;
            let (map_key, map_value) = decode_map_entry(bundle, key, field.kind, entry, depth)?;
            match target.get_mut(number) {
                Some(Value::Map(map)) => {
                    map.insert(map_key, map_value);
                }
                _ => target.set(number, Value::Map(BTreeMap::from([(map_key, map_value)]))),
            }
        }
        Cardinality::Repeated => {
            let mut items = Vec::new();
            if wire_type == WireType::LengthDelimited && field.kind.is_packable() {
                let mut packed = take_length_delimited(buf)?;
                while packed.has_remaining() {
                    items.push(read_value(bundle, &mut packed, field.kind, wire_type_of(field.kind), depth)?);
                }
            } else {
                items.push(read_value(bundle, buf, field.kind, wire_type, depth)?);
            }
            match target.get_mut(number) {
                Some(Value::List(list)) => list.extend(items),
                _ => target.set(number, Value::List(items)),
            }
        }
        Cardinality::Singular => {
            if let (FieldKind::Message(_), Some(Value::Message(existing))) =
                (field.kind, target.get_mut(number))
            {
                // 重复出现的消息字段按合并语义处理
                encoding::check_wire_type(WireType::LengthDelimited, wire_type)?;
                let body = take_length_delimited(buf)?;
                return decode_into(bundle, body, existing, depth + 1);
            }
            let value = read_value(bundle, buf, field.kind, wire_type, depth)?;
            target.set_field(descriptor, index, value);
        }
    }
    Ok(())
}

fn decode_map_entry(
    bundle: &SchemaBundle,
    key_kind: FieldKind,
    value_kind: FieldKind,
    mut buf: &[u8],
    depth: usize,
) -> Result<(MapKey, Value), CodecError> {
    let mut key = None;
    let mut value = None;
    while buf.has_remaining() {
        let (number, wire_type) = encoding::decode_key(&mut buf)?;
        match number {
            1 => key = Some(read_value(bundle, &mut buf, key_kind, wire_type, depth)?),
            2 => value = Some(read_value(bundle, &mut buf, value_kind, wire_type, depth)?),
            _ => encoding::skip_field(wire_type, number, &mut buf, DecodeContext::default())?,
        }
    }
    let key = key.unwrap_or_else(|| Value::default_for(key_kind, bundle));
    let key = MapKey::from_value(key)
        .ok_or_else(|| CodecError::new("map key has an unsupported type"))?;
    let value = value.unwrap_or_else(|| Value::default_for(value_kind, bundle));
    Ok((key, value))
}

/// 读取单个值；`module` 为 `prost::encoding` 下对应的标量编码模块。
macro_rules! merge_scalar {
    ($module:ident, $variant:ident, $wire_type:expr, $buf:expr) => {{
        let mut value = Default::default();
        encoding::$module::merge($wire_type, &mut value, $buf, DecodeContext::default())?;
        Value::$variant(value)
    }};
}

fn read_value(
    bundle: &SchemaBundle,
    buf: &mut &[u8],
    kind: FieldKind,
    wire_type: WireType,
    depth: usize,
) -> Result<Value, CodecError> {
    Ok(match kind {
        FieldKind::Int32 => merge_scalar!(int32, I32, wire_type, buf),
        FieldKind::Int64 => merge_scalar!(int64, I64, wire_type, buf),
        FieldKind::UInt32 => merge_scalar!(uint32, U32, wire_type, buf),
        FieldKind::UInt64 => merge_scalar!(uint64, U64, wire_type, buf),
        FieldKind::SInt32 => merge_scalar!(sint32, I32, wire_type, buf),
        FieldKind::SInt64 => merge_scalar!(sint64, I64, wire_type, buf),
        FieldKind::Bool => merge_scalar!(bool, Bool, wire_type, buf),
        FieldKind::Enum(_) => merge_scalar!(int32, Enum, wire_type, buf),
        FieldKind::Fixed32 => merge_scalar!(fixed32, U32, wire_type, buf),
        FieldKind::SFixed32 => merge_scalar!(sfixed32, I32, wire_type, buf),
        FieldKind::Float => merge_scalar!(float, F32, wire_type, buf),
        FieldKind::Fixed64 => merge_scalar!(fixed64, U64, wire_type, buf),
        FieldKind::SFixed64 => merge_scalar!(sfixed64, I64, wire_type, buf),
        FieldKind::Double => merge_scalar!(double, F64, wire_type, buf),
        FieldKind::String => merge_scalar!(string, String, wire_type, buf),
        FieldKind::Bytes => {
            let mut value: Vec<u8> = Vec::new();
            encoding::bytes::merge(wire_type, &mut value, buf, DecodeContext::default())?;
            Value::Bytes(value)
        }
        FieldKind::Message(id) => {
            encoding::check_wire_type(WireType::LengthDelimited, wire_type)?;
            let body = take_length_delimited(buf)?;
            let mut nested = DynamicMessage::new(id);
            decode_into(bundle, body, &mut nested, depth + 1)?;
            Value::Message(nested)
        }
    })
}

/// 编码动态消息。字段按编号升序输出；无显式存在性的字段取默认值时省略。
pub fn encode_message(bundle: &SchemaBundle, message: &DynamicMessage) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    encode_into(bundle, message, &mut buf)?;
    Ok(buf)
}

fn encode_into(
    bundle: &SchemaBundle,
    message: &DynamicMessage,
    buf: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let descriptor = bundle.message(message.message_id());
    for (number, value) in message.fields() {
        let field = descriptor.field_by_number(number).ok_or_else(|| {
            CodecError::new(format!(
                "field number {number} is not declared by `{}`",
                descriptor.full_name
            ))
        })?;
        encode_field(bundle, buf, field, value).map_err(|err| err.within(&field.json_name))?;
    }
    Ok(())
}

fn encode_field(
    bundle: &SchemaBundle,
    buf: &mut Vec<u8>,
    field: &Field,
    value: &Value,
) -> Result<(), CodecError> {
    match (field.cardinality, value) {
        (Cardinality::Singular, value) => {
            if field.has_presence || !value.is_default() {
                write_field(bundle, buf, field.number, field.kind, value)?;
            }
        }
        (Cardinality::Repeated, Value::List(items)) if field.packed => {
            write_packed(buf, field.number, field.kind, items)?;
        }
        (Cardinality::Repeated, Value::List(items)) => {
            for item in items {
                write_field(bundle, buf, field.number, field.kind, item)?;
            }
        }
        (Cardinality::Map { key }, Value::Map(entries)) => {
            for (map_key, map_value) in entries {
                let mut entry = Vec::new();
                write_field(bundle, &mut entry, 1, key, &map_key.to_value())?;
                write_field(bundle, &mut entry, 2, field.kind, map_value)?;
                encoding::bytes::encode(field.number, &entry, buf);
            }
        }
        _ => {
            return Err(CodecError::new(
                "value shape does not match the field cardinality",
            ));
        }
    }
    Ok(())
}

fn mismatch(kind: FieldKind, value: &Value) -> CodecError {
    CodecError::new(format!("value {value:?} does not fit field type {kind:?}"))
}

/// 写入带字段头的单个值。
fn write_field(
    bundle: &SchemaBundle,
    buf: &mut Vec<u8>,
    number: u32,
    kind: FieldKind,
    value: &Value,
) -> Result<(), CodecError> {
    match (kind, value) {
        (FieldKind::Int32, Value::I32(v)) | (FieldKind::Enum(_), Value::Enum(v)) => {
            encoding::int32::encode(number, v, buf)
        }
        (FieldKind::Int64, Value::I64(v)) => encoding::int64::encode(number, v, buf),
        (FieldKind::UInt32, Value::U32(v)) => encoding::uint32::encode(number, v, buf),
        (FieldKind::UInt64, Value::U64(v)) => encoding::uint64::encode(number, v, buf),
        (FieldKind::SInt32, Value::I32(v)) => encoding::sint32::encode(number, v, buf),
        (FieldKind::SInt64, Value::I64(v)) => encoding::sint64::encode(number, v, buf),
        (FieldKind::Bool, Value::Bool(v)) => encoding::bool::encode(number, v, buf),
        (FieldKind::Fixed32, Value::U32(v)) => encoding::fixed32::encode(number, v, buf),
        (FieldKind::SFixed32, Value::I32(v)) => encoding::sfixed32::encode(number, v, buf),
        (FieldKind::Float, Value::F32(v)) => encoding::float::encode(number, v, buf),
        (FieldKind::Fixed64, Value::U64(v)) => encoding::fixed64::encode(number, v, buf),
        (FieldKind::SFixed64, Value::I64(v)) => encoding::sfixed64::encode(number, v, buf),
        (FieldKind::Double, Value::F64(v)) => encoding::double::encode(number, v, buf),
        (FieldKind::String, Value::String(v)) => encoding::string::encode(number, v, buf),
        (FieldKind::Bytes, Value::Bytes(v)) => encoding::bytes::encode(number, v, buf),
        (FieldKind::Message(_), Value::Message(nested)) => {
            let mut body = Vec::new();
            encode_into(bundle, nested, &mut body)?;
            encoding::bytes::encode(number, &body, buf);
        }
        (kind, value) => return Err(mismatch(kind, value)),
    }
    Ok(())
}

/// 把列表按 `$variant` 取出同类型的原生值，再交给对应模块的 `encode_packed`。
macro_rules! packed {
    ($module:ident, $variant:ident, $number:expr, $kind:expr, $items:expr, $buf:expr) => {{
        let values = $items
            .iter()
            .map(|item| match item {
                Value::$variant(v) => Ok(*v),
                other => Err(mismatch($kind, other)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        encoding::$module::encode_packed($number, &values, $buf);
    }};
}

/// packed 编码；空列表不输出任何字节。
fn write_packed(
    buf: &mut Vec<u8>,
    number: u32,
    kind: FieldKind,
    items: &[Value],
) -> Result<(), CodecError> {
    match kind {
        FieldKind::Int32 => packed!(int32, I32, number, kind, items, buf),
        FieldKind::Int64 => packed!(int64, I64, number, kind, items, buf),
        FieldKind::UInt32 => packed!(uint32, U32, number, kind, items, buf),
        FieldKind::UInt64 => packed!(uint64, U64, number, kind, items, buf),
        FieldKind::SInt32 => packed!(sint32, I32, number, kind, items, buf),
        FieldKind::SInt64 => packed!(sint64, I64, number, kind, items, buf),
        FieldKind::Bool => packed!(bool, Bool, number, kind, items, buf),
        FieldKind::Enum(_) => packed!(int32, Enum, number, kind, items, buf),
        FieldKind::Fixed32 => packed!(fixed32, U32, number, kind, items, buf),
        FieldKind::SFixed32 => packed!(sfixed32, I32, number, kind, items, buf),
        FieldKind::Float => packed!(float, F32, number, kind, items, buf),
        FieldKind::Fixed64 => packed!(fixed64, U64, number, kind, items, buf),
        FieldKind::SFixed64 => packed!(sfixed64, I64, number, kind, items, buf),
        FieldKind::Double => packed!(double, F64, number, kind, items, buf),
        FieldKind::String | FieldKind::Bytes | FieldKind::Message(_) => {
            return Err(CodecError::new(format!("{kind:?} fields cannot be packed")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{RawField, RawFile, RawKind, RawMessage, Syntax, link};

    fn bundle() -> SchemaBundle {
        link(vec![
            RawFile::new("wire.proto").package("t").syntax(Syntax::Proto3).message(
                RawMessage::new("Sample")
                    .field(RawField::new("count", 1, RawKind::Int32))
                    .field(RawField::new("values", 2, RawKind::Int32).repeated())
                    .field(RawField::message("child", 3, "Sample"))
                    .oneof(
                        "choice",
                        [
                            RawField::new("left", 4, RawKind::String),
                            RawField::new("right", 5, RawKind::String),
                        ],
                    )
                    .field(RawField::new("delta", 6, RawKind::SInt64)),
            ),
        ])
        .expect("测试 schema 应可链接")
    }

    fn id(bundle: &SchemaBundle) -> MessageId {
        bundle.find_message("t.Sample").expect("Sample")
    }

    #[test]
    fn packed_and_unpacked_repeated_are_both_accepted() {
        let bundle = bundle();
        // field 2 packed [1, 2] followed by an unpacked 3
        let bytes = [0x12, 0x02, 0x01, 0x02, 0x10, 0x03];
        let message = decode_message(&bundle, id(&bundle), &bytes).expect("可解析");
        assert_eq!(
            message.get(2),
            Some(&Value::List(vec![Value::I32(1), Value::I32(2), Value::I32(3)]))
        );
        // proto3 默认 packed 输出
        assert_eq!(encode_message(&bundle, &message).expect("可编码"), [0x12, 0x03, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn implicit_defaults_are_not_written() {
        let bundle = bundle();
        let mut message = DynamicMessage::new(id(&bundle));
        message.set(1, Value::I32(0));
        message.set(4, Value::String(String::new()));
        // count 被省略；oneof 成员有显式存在性，空串也要写出
        assert_eq!(encode_message(&bundle, &message).expect("可编码"), [0x22, 0x00]);
    }

    #[test]
    fn zigzag_values_use_the_short_encoding() {
        let bundle = bundle();
        let mut message = DynamicMessage::new(id(&bundle));
        message.set(6, Value::I64(-1));
        let bytes = encode_message(&bundle, &message).expect("可编码");
        assert_eq!(bytes, [0x30, 0x01]);
        let decoded = decode_message(&bundle, id(&bundle), &bytes).expect("可解析");
        assert_eq!(decoded.get(6), Some(&Value::I64(-1)));
    }

    #[test]
    fn later_oneof_member_clears_the_earlier_one() {
        let bundle = bundle();
        let bytes = [0x22, 0x01, b'l', 0x2A, 0x01, b'r'];
        let message = decode_message(&bundle, id(&bundle), &bytes).expect("可解析");
        assert!(!message.has(4));
        assert_eq!(message.get(5), Some(&Value::String("r".into())));
    }

    #[test]
    fn repeated_nested_message_fields_merge() {
        let bundle = bundle();
        // child{count=1} then child{values=[2]}
        let bytes = [0x1A, 0x02, 0x08, 0x01, 0x1A, 0x03, 0x12, 0x01, 0x02];
        let message = decode_message(&bundle, id(&bundle), &bytes).expect("可解析");
        let Some(Value::Message(child)) = message.get(3) else {
            panic!("child 应被设置");
        };
        assert_eq!(child.get(1), Some(&Value::I32(1)));
        assert_eq!(child.get(2), Some(&Value::List(vec![Value::I32(2)])));
    }

    #[test]
    fn wire_type_mismatch_names_the_field() {
        let bundle = bundle();
        let err = decode_message(&bundle, id(&bundle), &[0x0D, 0, 0, 0, 0]).expect_err("类型不符");
        assert_eq!(err.path, "count");
    }

    #[test]
    fn length_prefix_past_the_end_is_rejected() {
        let bundle = bundle();
        let err = decode_message(&bundle, id(&bundle), &[0x1A, 0x7F, 0x08]).expect_err("长度越界");
        assert_eq!(err.path, "child");
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let bundle = bundle();
        let mut bytes = Vec::new();
        for _ in 0..(MAX_DEPTH + 2) {
            let mut outer = Vec::new();
            encoding::bytes::encode(3, &bytes, &mut outer);
            bytes = outer;
        }
        let err = decode_message(&bundle, id(&bundle), &bytes).expect_err("超出嵌套上限");
        assert!(err.detail.contains("nesting"), "{err}");
    }

    #[test]
    fn deeply_nested_unknown_groups_fail_instead_of_overflowing() {
        let bundle = bundle();
        // 0x7B = field 15, wire type 3 (start group)；field 15 未声明，走跳过路径
        let err = decode_message(&bundle, id(&bundle), &vec![0x7B; 1_000_000]).expect_err("嵌套 group 必须被拒绝");
        assert!(err.path.is_empty(), "{err}");
    }

    #[test]
    fn unknown_scalar_fields_are_skipped() {
        let bundle = bundle();
        // field 9 varint 7, then count = 5
        let message = decode_message(&bundle, id(&bundle), &[0x48, 0x07, 0x08, 0x05]).expect("可解析");
        assert_eq!(message.get(1), Some(&Value::I32(5)));
        assert!(!message.has(9));
    }
}
