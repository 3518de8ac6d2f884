//! 动态消息 ⇄ proto3 规范 JSON。
//!
//! # 教案式说明
//! - **输出 (What)**：键使用规范 JSON 名（`json_name` 或 lowerCamelCase），字段按声明顺序排列；
//!   64 位整数以字符串输出，`bytes` 为标准 base64，枚举输出名称（未知数值退化为数字），
//!   `NaN`/`Infinity` 以字符串表示。未设置的 repeated/map 输出 `[]`/`{}`，未设置的标量输出类型默认值，
//!   未设置的消息字段与互斥组成员省略。
//! - **输入 (What)**：规范 JSON 名与原始字段名均可接受；`null` 等同于未设置；未知键、同一互斥组
//!   设置多个成员、越界整数、未知枚举名或数值都会报错并携带字段路径。

use std::collections::{BTreeMap, HashMap};

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use serde_json::{Map, Number, Value as Json};

use super::CodecError;
use super::value::{DynamicMessage, MapKey, Value};
use crate::bundle::{Cardinality, Field, FieldKind, MessageId, SchemaBundle};

/// 将动态消息渲染为 JSON 对象。
pub fn to_json(bundle: &SchemaBundle, message: &DynamicMessage) -> Json {
    let descriptor = bundle.message(message.message_id());
    let mut object = Map::with_capacity(descriptor.fields.len());
    for field in &descriptor.fields {
        let rendered = match message.get(field.number) {
            Some(value) => render_field(bundle, field, value),
            None => match field.cardinality {
                Cardinality::Map { .. } => Json::Object(Map::new()),
                Cardinality::Repeated => Json::Array(Vec::new()),
                Cardinality::Singular
                    if field.group.is_some() || matches!(field.kind, FieldKind::Message(_)) =>
                {
                    continue;
                }
                Cardinality::Singular => {
                    render_value(bundle, field.kind, &Value::default_for(field.kind, bundle))
                }
            },
        };
        object.insert(field.json_name.clone(), rendered);
    }
    Json::Object(object)
}

fn render_field(bundle: &SchemaBundle, field: &Field, value: &Value) -> Json {
    match value {
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|item| render_value(bundle, field.kind, item))
                .collect(),
        ),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(key, item)| (key.to_json_key(), render_value(bundle, field.kind, item)))
                .collect(),
        ),
        value => render_value(bundle, field.kind, value),
    }
}

fn render_value(bundle: &SchemaBundle, kind: FieldKind, value: &Value) -> Json {
    match value {
        Value::Bool(v) => Json::Bool(*v),
        Value::I32(v) => Json::from(*v),
        Value::U32(v) => Json::from(*v),
        Value::I64(v) => Json::String(v.to_string()),
        Value::U64(v) => Json::String(v.to_string()),
        // 经十进制字符串中转，避免 0.1f32 被放大成 0.10000000149011612
        Value::F32(v) => render_float(f64::from(*v), || v.to_string().parse().ok()),
        Value::F64(v) => render_float(*v, || Some(*v)),
        Value::String(v) => Json::String(v.clone()),
        Value::Bytes(v) => Json::String(STANDARD.encode(v)),
        Value::Enum(number) => match kind {
            FieldKind::Enum(id) => bundle
                .enumeration(id)
                .name_of(*number)
                .map_or_else(|| Json::from(*number), |name| Json::String(name.to_owned())),
            _ => Json::from(*number),
        },
        Value::Message(nested) => to_json(bundle, nested),
        Value::List(_) | Value::Map(_) => Json::Null,
    }
}

fn render_float(raw: f64, shortest: impl FnOnce() -> Option<f64>) -> Json {
    if raw.is_nan() {
        Json::String("NaN".to_owned())
    } else if raw.is_infinite() {
        Json::String(if raw > 0.0 { "Infinity" } else { "-Infinity" }.to_owned())
    } else {
        let value = shortest().unwrap_or(raw);
        Number::from_f64(value).map_or(Json::Null, Json::Number)
    }
}

/// 将 JSON 对象合并为目标类型的动态消息。
pub fn from_json(bundle: &SchemaBundle, id: MessageId, json: &Json) -> Result<DynamicMessage, CodecError> {
    let descriptor = bundle.message(id);
    let Json::Object(object) = json else {
        return Err(CodecError::new(format!(
            "expected a JSON object for `{}`",
            descriptor.full_name
        )));
    };

    let mut message = DynamicMessage::new(id);
    let mut seen: HashMap<usize, &str> = HashMap::new();
    let mut groups_set: HashMap<usize, &str> = HashMap::new();
    for (key, raw) in object {
        let (index, field) = descriptor.field_by_json_key(key).ok_or_else(|| {
            CodecError::new(format!(
                "unknown field `{key}` for `{}`",
                descriptor.full_name
            ))
        })?;
        if let Some(previous) = seen.insert(index, key) {
            return Err(CodecError::new(format!(
                "field `{}` is given twice (as `{previous}` and `{key}`)",
                field.name
            )));
        }
        if raw.is_null() {
            continue;
        }
        if let Some(group) = field.group {
            if let Some(other) = groups_set.insert(group, key) {
                return Err(CodecError::new(format!(
                    "`{other}` and `{key}` both belong to oneOf '{}'",
                    descriptor.groups[group].name
                )));
            }
        }
        let value = parse_field(bundle, field, raw).map_err(|err| err.within(&field.json_name))?;
        message.set_field(descriptor, index, value);
    }
    Ok(message)
}

fn parse_field(bundle: &SchemaBundle, field: &Field, raw: &Json) -> Result<Value, CodecError> {
    match field.cardinality {
        Cardinality::Singular => parse_value(bundle, field.kind, raw),
        Cardinality::Repeated => {
            let Json::Array(items) = raw else {
                return Err(CodecError::new("expected a JSON array"));
            };
            items
                .iter()
                .enumerate()
                .map(|(position, item)| {
                    parse_value(bundle, field.kind, item)
                        .map_err(|err| err.within(&format!("[{position}]")))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        Cardinality::Map { key } => {
            let Json::Object(entries) = raw else {
                return Err(CodecError::new("expected a JSON object"));
            };
            let mut map = BTreeMap::new();
            for (raw_key, item) in entries {
                let at = format!("[{raw_key}]");
                let map_key = parse_map_key(key, raw_key).map_err(|err| err.within(&at))?;
                let value = parse_value(bundle, field.kind, item).map_err(|err| err.within(&at))?;
                map.insert(map_key, value);
            }
            Ok(Value::Map(map))
        }
    }
}

fn parse_map_key(kind: FieldKind, raw: &str) -> Result<MapKey, CodecError> {
    let invalid = || CodecError::new(format!("`{raw}` is not a valid map key"));
    Ok(match kind {
        FieldKind::String => MapKey::String(raw.to_owned()),
        FieldKind::Bool => match raw {
            "true" => MapKey::Bool(true),
            "false" => MapKey::Bool(false),
            _ => return Err(invalid()),
        },
        FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 => {
            MapKey::I32(raw.parse().map_err(|_| invalid())?)
        }
        FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => {
            MapKey::I64(raw.parse().map_err(|_| invalid())?)
        }
        FieldKind::UInt32 | FieldKind::Fixed32 => MapKey::U32(raw.parse().map_err(|_| invalid())?),
        FieldKind::UInt64 | FieldKind::Fixed64 => MapKey::U64(raw.parse().map_err(|_| invalid())?),
        _ => return Err(invalid()),
    })
}

fn parse_value(bundle: &SchemaBundle, kind: FieldKind, raw: &Json) -> Result<Value, CodecError> {
    if raw.is_null() {
        return Err(CodecError::new("null is not allowed here"));
    }
    Ok(match kind {
        FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 => {
            let wide = parse_i64(raw)?;
            Value::I32(i32::try_from(wide).map_err(|_| out_of_range(raw, "int32"))?)
        }
        FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => Value::I64(parse_i64(raw)?),
        FieldKind::UInt32 | FieldKind::Fixed32 => {
            let wide = parse_u64(raw)?;
            Value::U32(u32::try_from(wide).map_err(|_| out_of_range(raw, "uint32"))?)
        }
        FieldKind::UInt64 | FieldKind::Fixed64 => Value::U64(parse_u64(raw)?),
        FieldKind::Double => Value::F64(parse_f64(raw)?),
        FieldKind::Float => {
            let wide = parse_f64(raw)?;
            if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
                return Err(out_of_range(raw, "float"));
            }
            Value::F32(wide as f32)
        }
        FieldKind::Bool => match raw {
            Json::Bool(v) => Value::Bool(*v),
            _ => return Err(CodecError::new(format!("expected a boolean, got {raw}"))),
        },
        FieldKind::String => match raw {
            Json::String(v) => Value::String(v.clone()),
            _ => return Err(CodecError::new(format!("expected a string, got {raw}"))),
        },
        FieldKind::Bytes => {
            let Json::String(text) = raw else {
                return Err(CodecError::new(format!("expected base64 text, got {raw}")));
            };
            Value::Bytes(decode_base64(text)?)
        }
        FieldKind::Enum(id) => {
            let enumeration = bundle.enumeration(id);
            let number = match raw {
                Json::String(name) => enumeration.number_of(name).ok_or_else(|| {
                    CodecError::new(format!(
                        "`{name}` is not a value of enum `{}`",
                        enumeration.full_name
                    ))
                })?,
                Json::Number(_) => {
                    let number = i32::try_from(parse_i64(raw)?)
                        .map_err(|_| out_of_range(raw, "enum"))?;
                    if enumeration.name_of(number).is_none() {
                        return Err(CodecError::new(format!(
                            "{number} is not a value of enum `{}`",
                            enumeration.full_name
                        )));
                    }
                    number
                }
                _ => return Err(CodecError::new(format!("expected an enum name, got {raw}"))),
            };
            Value::Enum(number)
        }
        FieldKind::Message(id) => Value::Message(from_json(bundle, id, raw)?),
    })
}

fn out_of_range(raw: &Json, target: &str) -> CodecError {
    CodecError::new(format!("{raw} is out of range for {target}"))
}

fn parse_i64(raw: &Json) -> Result<i64, CodecError> {
    match raw {
        Json::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(integral_f64).and_then(|v| {
                (v >= i64::MIN as f64 && v < i64::MAX as f64).then_some(v as i64)
            }))
            .ok_or_else(|| out_of_range(raw, "a signed integer")),
        Json::String(text) => text
            .parse()
            .map_err(|_| CodecError::new(format!("`{text}` is not a signed integer"))),
        _ => Err(CodecError::new(format!("expected an integer, got {raw}"))),
    }
}

fn parse_u64(raw: &Json) -> Result<u64, CodecError> {
    match raw {
        Json::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().and_then(integral_f64).and_then(|v| {
                (v >= 0.0 && v < u64::MAX as f64).then_some(v as u64)
            }))
            .ok_or_else(|| out_of_range(raw, "an unsigned integer")),
        Json::String(text) => text
            .parse()
            .map_err(|_| CodecError::new(format!("`{text}` is not an unsigned integer"))),
        _ => Err(CodecError::new(format!("expected an integer, got {raw}"))),
    }
}

/// `1.0`、`1e3` 这类整数值的浮点写法同样被接受。
fn integral_f64(value: f64) -> Option<f64> {
    (value.is_finite() && value.fract() == 0.0).then_some(value)
}

fn parse_f64(raw: &Json) -> Result<f64, CodecError> {
    match raw {
        Json::Number(number) => number
            .as_f64()
            .ok_or_else(|| CodecError::new(format!("{raw} is not a number"))),
        Json::String(text) => match text.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other
                .parse()
                .map_err(|_| CodecError::new(format!("`{other}` is not a number"))),
        },
        _ => Err(CodecError::new(format!("expected a number, got {raw}"))),
    }
}

fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(text)
        .or_else(|_| URL_SAFE.decode(text))
        .or_else(|_| STANDARD_NO_PAD.decode(text))
        .or_else(|_| URL_SAFE_NO_PAD.decode(text))
        .map_err(|_| CodecError::new("invalid base64 text"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::bundle::{RawEnum, RawField, RawFile, RawKind, RawMessage, Syntax, link};

    fn bundle() -> SchemaBundle {
        link(vec![
            RawFile::new("json.proto")
                .package("t")
                .syntax(Syntax::Proto3)
                .enumeration(RawEnum::new("Level").value("LOW", 0).value("HIGH", 1))
                .message(
                    RawMessage::new("Reading")
                        .field(RawField::new("sensor_id", 1, RawKind::Int64))
                        .field(RawField::new("ratio", 2, RawKind::Float))
                        .field(RawField::new("raw", 3, RawKind::Bytes))
                        .field(RawField::enumeration("level", 4, "Level"))
                        .field(RawField::new("tags", 5, RawKind::String).repeated())
                        .map_field("counts", 6, RawKind::Int32, RawField::new("", 0, RawKind::UInt64))
                        .field(RawField::message("next", 7, "Reading"))
                        .optional(RawField::new("note", 8, RawKind::String)),
                ),
        ])
        .expect("测试 schema 应可链接")
    }

    fn reading(bundle: &SchemaBundle) -> MessageId {
        bundle.find_message("t.Reading").expect("Reading")
    }

    #[test]
    fn unset_fields_render_as_defaults_in_declaration_order() {
        let bundle = bundle();
        let json = to_json(&bundle, &DynamicMessage::new(reading(&bundle)));
        assert_eq!(
            json,
            json!({
                "sensorId": "0",
                "ratio": 0.0,
                "raw": "",
                "level": "LOW",
                "tags": [],
                "counts": {}
            })
        );
        let keys: Vec<_> = json.as_object().expect("对象").keys().cloned().collect();
        assert_eq!(keys, ["sensorId", "ratio", "raw", "level", "tags", "counts"]);
    }

    #[test]
    fn canonical_scalars_render_the_proto3_way() {
        let bundle = bundle();
        let parsed = from_json(
            &bundle,
            reading(&bundle),
            &json!({
                "sensor_id": 9007199254740993u64,
                "ratio": 0.1,
                "raw": "AQI=",
                "level": 1,
                "counts": {"-3": "18446744073709551615"},
                "note": null
            }),
        )
        .expect("可解析");
        let rendered = to_json(&bundle, &parsed);
        assert_eq!(rendered["sensorId"], json!("9007199254740993"));
        assert_eq!(rendered["ratio"], json!(0.1));
        assert_eq!(rendered["raw"], json!("AQI="));
        assert_eq!(rendered["level"], json!("HIGH"));
        assert_eq!(rendered["counts"], json!({"-3": "18446744073709551615"}));
        assert!(rendered.get("note").is_none());
    }

    #[test]
    fn rejections_carry_the_field_path() {
        let bundle = bundle();
        let id = reading(&bundle);

        let err = from_json(&bundle, id, &json!({"next": {"tags": ["ok", 3]}})).expect_err("类型错误");
        assert_eq!(err.path, "next.tags[1]");

        let err = from_json(&bundle, id, &json!({"level": "MEDIUM"})).expect_err("未知枚举名");
        assert_eq!(err.path, "level");

        let err = from_json(&bundle, id, &json!({"level": 7})).expect_err("未知枚举值");
        assert!(err.detail.contains("not a value"));

        let err = from_json(&bundle, id, &json!({"mystery": 1})).expect_err("未知键");
        assert!(err.detail.contains("mystery"));

        let err = from_json(&bundle, id, &json!({"sensorId": 1, "sensor_id": 2})).expect_err("重复键");
        assert!(err.detail.contains("twice"));
    }

    #[test]
    fn non_finite_floats_use_string_spellings() {
        let bundle = bundle();
        let parsed = from_json(&bundle, reading(&bundle), &json!({"ratio": "-Infinity"})).expect("可解析");
        assert_eq!(to_json(&bundle, &parsed)["ratio"], json!("-Infinity"));
    }
}
