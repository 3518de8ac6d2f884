//! # validation 模块说明
//!
//! ## 角色定位（Why）
//! - 通用 JSON 合并只保证“字段形态正确”，不保证“业务上完整”：声明的互斥组可能一个成员都没设置，
//!   proto2 `required` 字段可能缺席，严格模式下调用方可能漏写键。
//! - 本模块补齐这三类约束，并且总是一次性报告全部违规项，调用方修一次即可通过。
//!
//! ## 设计要求（What）
//! - 严格字段存在性：仅检查顶层 JSON 对象，在合并之前执行；显式 `null` 视为“已写出”。
//! - 互斥组：合并之后递归执行（单值、repeated、map 中的消息均会深入）；**声明组**必须恰有一个成员，
//!   **合成组**（proto3 `optional`）豁免。
//! - 必填字段：合并之后递归执行，按消息聚合缺失字段名。
//!
//! ## 执行逻辑（How）
//! - 所有检查都是纯函数，返回 [`ValidationReport`]；空报告即通过。

use std::fmt;

use crate::bundle::{Cardinality, FieldKind, MessageHandle, SchemaBundle};
use crate::codec::{DynamicMessage, Value};

/// 单条约束违规。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// 严格模式下顶层缺失的 JSON 键（规范 JSON 名）。
    MissingKeys {
        message_type: String,
        keys: Vec<String>,
    },
    /// 声明的互斥组没有任何成员被设置。
    ExclusivityUnset {
        message_type: String,
        path: String,
        group: String,
        candidates: Vec<String>,
    },
    /// proto2 必填字段缺失。
    MissingRequired {
        message_type: String,
        path: String,
        fields: Vec<String>,
    },
}

fn location(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" at `{path}`")
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingKeys { message_type, keys } => write!(
                f,
                "strict field presence: `{message_type}` is missing keys: {}",
                keys.join(", ")
            ),
            Violation::ExclusivityUnset {
                message_type,
                path,
                group,
                candidates,
            } => write!(
                f,
                "`{message_type}`{}: oneOf '{group}' requires exactly one of: {}",
                location(path),
                candidates.join(", ")
            ),
            Violation::MissingRequired {
                message_type,
                path,
                fields,
            } => write!(
                f,
                "`{message_type}`{} is missing required fields: {}",
                location(path),
                fields.join(", ")
            ),
        }
    }
}

/// 一次校验的完整违规清单。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join("; "))
    }
}

impl std::error::Error for ValidationReport {}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.violations.extend(other.violations);
    }
}

/// 约束校验器。无状态。
#[derive(Clone, Copy, Debug, Default)]
pub struct ConstraintValidator;

impl ConstraintValidator {
    /// 严格字段存在性：每个 schema 字段都必须以规范名或原始名出现在顶层对象中。
    pub fn check_field_presence(
        &self,
        handle: &MessageHandle,
        object: &serde_json::Map<String, serde_json::Value>,
    ) -> ValidationReport {
        let descriptor = handle.descriptor();
        let keys: Vec<String> = descriptor
            .fields
            .iter()
            .filter(|field| !object.contains_key(&field.json_name) && !object.contains_key(&field.name))
            .map(|field| field.json_name.clone())
            .collect();
        let mut report = ValidationReport::default();
        if !keys.is_empty() {
            report.push(Violation::MissingKeys {
                message_type: descriptor.full_name.clone(),
                keys,
            });
        }
        report
    }

    /// 合并后校验：互斥组在前，必填字段在后，两者都递归。
    pub fn validate(&self, handle: &MessageHandle, message: &DynamicMessage) -> ValidationReport {
        let mut report = self.check_exclusivity(handle.bundle(), message);
        report.extend(self.check_required(handle.bundle(), message));
        report
    }

    pub fn check_exclusivity(&self, bundle: &SchemaBundle, message: &DynamicMessage) -> ValidationReport {
        let mut report = ValidationReport::default();
        walk(bundle, message, String::new(), &mut |message: &DynamicMessage, path: &str| {
            let descriptor = bundle.message(message.message_id());
            for group in descriptor.groups.iter().filter(|group| !group.synthetic) {
                let set = group
                    .members
                    .iter()
                    .filter(|member| message.has(descriptor.fields[**member].number))
                    .count();
                // 多于一个在合并阶段已被拒绝，这里只剩“零个”一种违规
                if set == 0 {
                    report.push(Violation::ExclusivityUnset {
                        message_type: descriptor.full_name.clone(),
                        path: path.to_owned(),
                        group: group.name.clone(),
                        candidates: group
                            .members
                            .iter()
                            .map(|member| descriptor.fields[*member].json_name.clone())
                            .collect(),
                    });
                }
            }
        });
        report
    }

    pub fn check_required(&self, bundle: &SchemaBundle, message: &DynamicMessage) -> ValidationReport {
        let mut report = ValidationReport::default();
        walk(bundle, message, String::new(), &mut |message: &DynamicMessage, path: &str| {
            let descriptor = bundle.message(message.message_id());
            let fields: Vec<String> = descriptor
                .fields
                .iter()
                .filter(|field| field.required && !message.has(field.number))
                .map(|field| field.name.clone())
                .collect();
            if !fields.is_empty() {
                report.push(Violation::MissingRequired {
                    message_type: descriptor.full_name.clone(),
                    path: path.to_owned(),
                    fields,
                });
            }
        });
        report
    }
}

/// 先序遍历消息树，对每个（子）消息调用 `visit(message, path)`。
fn walk(
    bundle: &SchemaBundle,
    message: &DynamicMessage,
    path: String,
    visit: &mut dyn FnMut(&DynamicMessage, &str),
) {
    visit(message, &path);
    let descriptor = bundle.message(message.message_id());
    for field in &descriptor.fields {
        if !matches!(field.kind, FieldKind::Message(_)) {
            continue;
        }
        let child_path = |suffix: &str| {
            if path.is_empty() {
                format!("{}{suffix}", field.json_name)
            } else {
                format!("{path}.{}{suffix}", field.json_name)
            }
        };
        match (field.cardinality, message.get(field.number)) {
            (Cardinality::Singular, Some(Value::Message(nested))) => {
                walk(bundle, nested, child_path(""), visit);
            }
            (Cardinality::Repeated, Some(Value::List(items))) => {
                for (position, item) in items.iter().enumerate() {
                    if let Value::Message(nested) = item {
                        walk(bundle, nested, child_path(&format!("[{position}]")), visit);
                    }
                }
            }
            (Cardinality::Map { .. }, Some(Value::Map(entries))) => {
                for (key, item) in entries {
                    if let Value::Message(nested) = item {
                        walk(bundle, nested, child_path(&format!("[{}]", key.to_json_key())), visit);
                    }
                }
            }
            _ => {}
        }
    }
}
