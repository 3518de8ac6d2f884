//! 描述符集链接器。
//!
//! # 教案式说明
//! - **意图 (Why)**：输入中的文件顺序不可信（`protoc` 按依赖序输出，但远端对象可能由其他工具拼装），
//!   因此先做 Kahn 拓扑排序，再按拓扑序解析类型引用，任何合法顺序都能得到相同结果。
//! - **执行逻辑 (How)**：
//!   1. 文件名去重；
//!   2. Kahn 排序，未能入序的文件连同其缺失依赖一次性报告；
//!   3. 按输入顺序登记全部类型全名，得到确定的 bundle 遍历顺序；
//!   4. 按拓扑序解析字段类型，引用只能落在本文件的传递依赖闭包内；
//!   5. 第二遍识别 map 字段（repeated 引用 `map_entry` 类型）。
//! - **契约 (What)**：成功返回的 [`SchemaBundle`] 中不再保留任何字符串引用。

use std::collections::{HashMap, HashSet, VecDeque};

use super::raw::{RawField, RawFile, RawKind, RawLabel, RawMessage, Syntax};
use super::types::{
    Cardinality, EnumId, EnumType, ExclusivityGroup, Field, FieldKind, FileDef, FileId, MessageId,
    MessageType, SchemaBundle,
};
use crate::error::{BundleLinkError, UnresolvedFile};

/// 链接原始文件列表。
pub fn link(files: Vec<RawFile>) -> Result<SchemaBundle, BundleLinkError> {
    let by_name = index_files(&files)?;
    let order = topological_order(&files, &by_name)?;
    let closures = dependency_closures(&files, &by_name, &order);

    let mut linker = Linker::default();
    for (index, file) in files.iter().enumerate() {
        linker.declare_file(FileId(index), file, &by_name)?;
    }
    for &index in &order {
        linker.resolve_file(index, &files[index], &closures[index])?;
    }
    linker.finish()
}

fn index_files(files: &[RawFile]) -> Result<HashMap<&str, usize>, BundleLinkError> {
    let mut by_name = HashMap::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        if by_name.insert(file.name.as_str(), index).is_some() {
            return Err(BundleLinkError::DuplicateFile(file.name.clone()));
        }
    }
    Ok(by_name)
}

/// Kahn 拓扑排序；返回依赖在前的文件下标序列。
fn topological_order(
    files: &[RawFile],
    by_name: &HashMap<&str, usize>,
) -> Result<Vec<usize>, BundleLinkError> {
    let mut indegree = vec![0usize; files.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); files.len()];
    let mut missing: Vec<Vec<String>> = vec![Vec::new(); files.len()];

    for (index, file) in files.iter().enumerate() {
        let mut seen = HashSet::new();
        for dependency in &file.dependencies {
            if !seen.insert(dependency.as_str()) {
                continue;
            }
            match by_name.get(dependency.as_str()) {
                Some(&target) => {
                    indegree[index] += 1;
                    dependents[target].push(index);
                }
                None => missing[index].push(dependency.clone()),
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..files.len())
        .filter(|index| indegree[*index] == 0 && missing[*index].is_empty())
        .collect();
    let mut order = Vec::with_capacity(files.len());
    while let Some(index) = queue.pop_front() {
        order.push(index);
        for &dependent in &dependents[index] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 && missing[dependent].is_empty() {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() == files.len() {
        return Ok(order);
    }

    let mut linked = vec![false; files.len()];
    for &index in &order {
        linked[index] = true;
    }
    let mut unresolved = Vec::new();
    for (index, file) in files.iter().enumerate() {
        if linked[index] {
            continue;
        }
        let mut blocked_by = Vec::new();
        for dependency in &file.dependencies {
            if let Some(&target) = by_name.get(dependency.as_str()) {
                if !linked[target] && !blocked_by.contains(dependency) {
                    blocked_by.push(dependency.clone());
                }
            }
        }
        unresolved.push(UnresolvedFile {
            name: file.name.clone(),
            missing: std::mem::take(&mut missing[index]),
            blocked_by,
        });
    }
    Err(BundleLinkError::Unresolved { files: unresolved })
}

/// 每个文件的传递依赖闭包（含自身），以位图表示。
fn dependency_closures(
    files: &[RawFile],
    by_name: &HashMap<&str, usize>,
    order: &[usize],
) -> Vec<Vec<bool>> {
    let mut closures = vec![vec![false; files.len()]; files.len()];
    for &index in order {
        let mut closure = vec![false; files.len()];
        closure[index] = true;
        for dependency in &files[index].dependencies {
            if let Some(&target) = by_name.get(dependency.as_str()) {
                for (slot, visible) in closure.iter_mut().zip(&closures[target]) {
                    *slot |= *visible;
                }
            }
        }
        closures[index] = closure;
    }
    closures
}

#[derive(Clone, Copy)]
enum TypeRef {
    Message(MessageId),
    Enum(EnumId),
}

#[derive(Default)]
struct Linker<'a> {
    bundle: SchemaBundle,
    types: HashMap<String, TypeRef>,
    /// 每个文件声明的消息：`(id, 原始定义)`，按声明顺序。
    pending: Vec<Vec<(MessageId, &'a RawMessage)>>,
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_owned()
    } else {
        format!("{scope}.{name}")
    }
}

impl<'a> Linker<'a> {
    fn declare_file(
        &mut self,
        id: FileId,
        file: &'a RawFile,
        by_name: &HashMap<&str, usize>,
    ) -> Result<(), BundleLinkError> {
        self.pending.push(Vec::new());
        let mut messages = Vec::new();
        for message in &file.messages {
            self.declare_message(id, file, &file.package, message, &mut messages)?;
        }
        for enumeration in &file.enums {
            self.declare_enum(id, file, &file.package, &enumeration.name, &enumeration.values)?;
        }
        let dependencies = file
            .dependencies
            .iter()
            .filter_map(|name| by_name.get(name.as_str()).map(|index| FileId(*index)))
            .collect();
        self.bundle.files.push(FileDef {
            name: file.name.clone(),
            package: file.package.clone(),
            syntax: file.syntax,
            dependencies,
            messages,
        });
        Ok(())
    }

    fn declare_message(
        &mut self,
        file_id: FileId,
        file: &'a RawFile,
        scope: &str,
        message: &'a RawMessage,
        declared: &mut Vec<MessageId>,
    ) -> Result<(), BundleLinkError> {
        let full_name = qualify(scope, &message.name);
        let id = MessageId(self.bundle.messages.len());
        self.register(&file.name, &full_name, TypeRef::Message(id))?;
        self.bundle.messages.push(MessageType {
            full_name: full_name.clone(),
            name: message.name.clone(),
            file: file_id,
            syntax: file.syntax,
            fields: Vec::new(),
            groups: Vec::new(),
            map_entry: message.map_entry,
            by_number: HashMap::new(),
            by_json_key: HashMap::new(),
        });
        self.bundle.message_index.insert(full_name.clone(), id);
        declared.push(id);
        if let Some(pending) = self.pending.last_mut() {
            pending.push((id, message));
        }

        for nested in &message.nested {
            self.declare_message(file_id, file, &full_name, nested, declared)?;
        }
        for enumeration in &message.enums {
            self.declare_enum(file_id, file, &full_name, &enumeration.name, &enumeration.values)?;
        }
        Ok(())
    }

    fn declare_enum(
        &mut self,
        file_id: FileId,
        file: &RawFile,
        scope: &str,
        name: &str,
        values: &[(String, i32)],
    ) -> Result<(), BundleLinkError> {
        let full_name = qualify(scope, name);
        let id = EnumId(self.bundle.enums.len());
        self.register(&file.name, &full_name, TypeRef::Enum(id))?;
        self.bundle.enums.push(EnumType {
            full_name,
            file: file_id,
            values: values.to_vec(),
        });
        Ok(())
    }

    fn register(&mut self, file: &str, full_name: &str, type_ref: TypeRef) -> Result<(), BundleLinkError> {
        if self.types.insert(full_name.to_owned(), type_ref).is_some() {
            return Err(BundleLinkError::invalid(
                file,
                format!("type `{full_name}` is defined more than once"),
            ));
        }
        Ok(())
    }

    fn resolve_file(
        &mut self,
        index: usize,
        file: &RawFile,
        visible: &[bool],
    ) -> Result<(), BundleLinkError> {
        let pending = std::mem::take(&mut self.pending[index]);
        for (id, raw) in pending {
            let (fields, groups) = self.resolve_message(file, id, raw, visible)?;
            let message = &mut self.bundle.messages[id.0];
            for (position, field) in fields.iter().enumerate() {
                if message.by_number.insert(field.number, position).is_some() {
                    return Err(BundleLinkError::invalid(
                        &file.name,
                        format!("`{}` reuses field number {}", message.full_name, field.number),
                    ));
                }
            }
            for (position, field) in fields.iter().enumerate() {
                message
                    .by_json_key
                    .entry(field.json_name.clone())
                    .or_insert(position);
            }
            for (position, field) in fields.iter().enumerate() {
                message.by_json_key.entry(field.name.clone()).or_insert(position);
            }
            message.fields = fields;
            message.groups = groups;
        }
        Ok(())
    }

    fn resolve_message(
        &self,
        file: &RawFile,
        id: MessageId,
        raw: &RawMessage,
        visible: &[bool],
    ) -> Result<(Vec<Field>, Vec<ExclusivityGroup>), BundleLinkError> {
        let scope = self.bundle.messages[id.0].full_name.as_str();
        let mut groups: Vec<ExclusivityGroup> = raw
            .oneofs
            .iter()
            .map(|name| ExclusivityGroup {
                name: name.clone(),
                members: Vec::new(),
                synthetic: true,
            })
            .collect();

        let mut fields = Vec::with_capacity(raw.fields.len());
        for (position, raw_field) in raw.fields.iter().enumerate() {
            let kind = self.resolve_kind(file, scope, raw_field, visible)?;
            let group = match raw_field.oneof_index {
                Some(group_index) => {
                    let group = groups.get_mut(group_index as usize).ok_or_else(|| {
                        BundleLinkError::invalid(
                            &file.name,
                            format!("`{scope}.{}` refers to an undeclared oneof", raw_field.name),
                        )
                    })?;
                    group.members.push(position);
                    group.synthetic &= raw_field.proto3_optional;
                    Some(group_index as usize)
                }
                None => None,
            };
            let repeated = raw_field.label == RawLabel::Repeated;
            let has_presence = !repeated
                && (group.is_some()
                    || matches!(kind, FieldKind::Message(_))
                    || file.syntax == Syntax::Proto2);
            fields.push(Field {
                name: raw_field.name.clone(),
                json_name: raw_field
                    .json_name
                    .clone()
                    .unwrap_or_else(|| json_name_of(&raw_field.name)),
                number: raw_field.number,
                kind,
                cardinality: if repeated {
                    Cardinality::Repeated
                } else {
                    Cardinality::Singular
                },
                group,
                required: raw_field.label == RawLabel::Required,
                packed: repeated
                    && kind.is_packable()
                    && raw_field.packed.unwrap_or(file.syntax == Syntax::Proto3),
                has_presence,
            });
        }
        for group in &mut groups {
            // 空 oneof 不可能由编译器合成
            if group.members.is_empty() {
                group.synthetic = false;
            }
        }
        Ok((fields, groups))
    }

    fn resolve_kind(
        &self,
        file: &RawFile,
        scope: &str,
        field: &RawField,
        visible: &[bool],
    ) -> Result<FieldKind, BundleLinkError> {
        let scalar = match field.kind {
            RawKind::Double => Some(FieldKind::Double),
            RawKind::Float => Some(FieldKind::Float),
            RawKind::Int64 => Some(FieldKind::Int64),
            RawKind::UInt64 => Some(FieldKind::UInt64),
            RawKind::Int32 => Some(FieldKind::Int32),
            RawKind::Fixed64 => Some(FieldKind::Fixed64),
            RawKind::Fixed32 => Some(FieldKind::Fixed32),
            RawKind::Bool => Some(FieldKind::Bool),
            RawKind::String => Some(FieldKind::String),
            RawKind::Bytes => Some(FieldKind::Bytes),
            RawKind::UInt32 => Some(FieldKind::UInt32),
            RawKind::SFixed32 => Some(FieldKind::SFixed32),
            RawKind::SFixed64 => Some(FieldKind::SFixed64),
            RawKind::SInt32 => Some(FieldKind::SInt32),
            RawKind::SInt64 => Some(FieldKind::SInt64),
            RawKind::Message | RawKind::Enum => None,
            RawKind::Group => {
                return Err(BundleLinkError::invalid(
                    &file.name,
                    format!("`{scope}.{}` uses the unsupported group encoding", field.name),
                ));
            }
        };
        if let Some(kind) = scalar {
            return Ok(kind);
        }

        let type_name = field.type_name.as_deref().ok_or_else(|| {
            BundleLinkError::invalid(&file.name, format!("`{scope}.{}` has no type name", field.name))
        })?;
        let resolved = self.lookup(scope, type_name).ok_or_else(|| {
            BundleLinkError::invalid(
                &file.name,
                format!("`{scope}.{}` refers to unknown type `{type_name}`", field.name),
            )
        })?;
        let owner = match resolved {
            TypeRef::Message(id) => self.bundle.messages[id.0].file,
            TypeRef::Enum(id) => self.bundle.enums[id.0].file,
        };
        if !visible[owner.0] {
            return Err(BundleLinkError::invalid(
                &file.name,
                format!(
                    "`{scope}.{}` refers to `{type_name}` from `{}`, which is not a dependency",
                    field.name, self.bundle.files[owner.0].name
                ),
            ));
        }
        match (field.kind, resolved) {
            (RawKind::Message, TypeRef::Message(id)) => Ok(FieldKind::Message(id)),
            (RawKind::Enum, TypeRef::Enum(id)) => Ok(FieldKind::Enum(id)),
            _ => Err(BundleLinkError::invalid(
                &file.name,
                format!("`{scope}.{}`: `{type_name}` has the wrong kind", field.name),
            )),
        }
    }

    /// 绝对名（`.` 开头）精确查找；相对名由内向外逐层作用域查找。
    fn lookup(&self, scope: &str, type_name: &str) -> Option<TypeRef> {
        if let Some(absolute) = type_name.strip_prefix('.') {
            return self.types.get(absolute).copied();
        }
        let mut scope = scope;
        loop {
            if let Some(found) = self.types.get(&qualify(scope, type_name)) {
                return Some(*found);
            }
            if scope.is_empty() {
                return None;
            }
            scope = scope.rsplit_once('.').map_or("", |(parent, _)| parent);
        }
    }

    /// 第二遍：把 repeated 引用 map entry 的字段改写为 map 基数。
    fn finish(mut self) -> Result<SchemaBundle, BundleLinkError> {
        let mut rewrites = Vec::new();
        for (message_index, message) in self.bundle.messages.iter().enumerate() {
            for (field_index, field) in message.fields.iter().enumerate() {
                let FieldKind::Message(entry_id) = field.kind else {
                    continue;
                };
                let entry = &self.bundle.messages[entry_id.0];
                if !entry.map_entry || !field.is_repeated() {
                    continue;
                }
                let file = &self.bundle.files[message.file.0].name;
                let (Some(key), Some(value)) = (entry.field_by_number(1), entry.field_by_number(2))
                else {
                    return Err(BundleLinkError::invalid(
                        file,
                        format!("map entry `{}` lacks key or value", entry.full_name),
                    ));
                };
                if !key.kind.is_map_key() {
                    return Err(BundleLinkError::invalid(
                        file,
                        format!("map entry `{}` has an invalid key type", entry.full_name),
                    ));
                }
                rewrites.push((message_index, field_index, key.kind, value.kind));
            }
        }
        for (message_index, field_index, key, value) in rewrites {
            let field = &mut self.bundle.messages[message_index].fields[field_index];
            field.cardinality = Cardinality::Map { key };
            field.kind = value;
            field.packed = false;
        }
        Ok(self.bundle)
    }
}

/// 与 `protoc` 一致的 lowerCamelCase 转换：下划线后的字符大写，下划线本身丢弃。
pub(crate) fn json_name_of(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::raw::{RawEnum, RawField, RawFile, RawKind, RawMessage};

    fn file_a() -> RawFile {
        RawFile::new("a.proto")
            .package("demo")
            .syntax(Syntax::Proto3)
            .message(RawMessage::new("A").field(RawField::new("id", 1, RawKind::Int64)))
    }

    fn file_b() -> RawFile {
        RawFile::new("b.proto")
            .package("demo")
            .syntax(Syntax::Proto3)
            .depends_on("a.proto")
            .message(RawMessage::new("B").field(RawField::message("a", 1, "A")))
    }

    #[test]
    fn dependent_listed_first_still_links() {
        let bundle = link(vec![file_b(), file_a()]).expect("逆序输入也应链接成功");
        let b = bundle.find_message("demo.B").expect("B 已登记");
        let a = bundle.find_message(".demo.A").expect("A 已登记");
        assert_eq!(bundle.message(b).fields[0].kind, FieldKind::Message(a));
        // bundle 顺序保持输入顺序
        assert_eq!(bundle.files()[0].name, "b.proto");
        assert_eq!(bundle.files()[0].dependencies, vec![FileId(1)]);
    }

    #[test]
    fn missing_dependency_names_file_and_dependency() {
        let err = link(vec![file_b()]).expect_err("缺失依赖必须失败");
        assert_eq!(
            err,
            BundleLinkError::Unresolved {
                files: vec![UnresolvedFile {
                    name: "b.proto".into(),
                    missing: vec!["a.proto".into()],
                    blocked_by: vec![],
                }]
            }
        );
    }

    #[test]
    fn cycle_reports_every_member() {
        let x = RawFile::new("x.proto").depends_on("y.proto");
        let y = RawFile::new("y.proto").depends_on("x.proto");
        let z = RawFile::new("z.proto").depends_on("y.proto");
        let BundleLinkError::Unresolved { files } =
            link(vec![x, y, z, file_a()]).expect_err("环必须失败")
        else {
            panic!("应报告未解析文件");
        };
        let names: Vec<_> = files.iter().map(|file| file.name.as_str()).collect();
        assert_eq!(names, ["x.proto", "y.proto", "z.proto"]);
        assert!(files.iter().all(|file| file.missing.is_empty()));
        assert_eq!(files[0].blocked_by, vec!["y.proto".to_owned()]);
    }

    #[test]
    fn duplicate_file_names_are_rejected() {
        let err = link(vec![file_a(), file_a()]).expect_err("重名文件");
        assert_eq!(err, BundleLinkError::DuplicateFile("a.proto".into()));
    }

    #[test]
    fn type_outside_dependency_closure_is_invalid() {
        let b = RawFile::new("b.proto")
            .package("demo")
            .message(RawMessage::new("B").field(RawField::message("a", 1, ".demo.A")));
        let err = link(vec![file_a(), b]).expect_err("未声明依赖的引用");
        assert!(matches!(err, BundleLinkError::InvalidDefinition { ref file, .. } if file == "b.proto"));
    }

    #[test]
    fn relative_names_resolve_from_the_innermost_scope() {
        let file = RawFile::new("scope.proto")
            .package("outer.inner")
            .enumeration(RawEnum::new("Kind").value("NONE", 0))
            .message(
                RawMessage::new("Holder")
                    .nested(RawMessage::new("Kind"))
                    .field(RawField::message("nested_kind", 1, "Kind"))
                    .field(RawField::enumeration("top_kind", 2, "inner.Kind")),
            );
        let bundle = link(vec![file]).expect("作用域查找");
        let holder = bundle.message(bundle.find_message("outer.inner.Holder").expect("Holder"));
        let nested = bundle.find_message("outer.inner.Holder.Kind").expect("嵌套 Kind");
        assert_eq!(holder.fields[0].kind, FieldKind::Message(nested));
        assert!(matches!(holder.fields[1].kind, FieldKind::Enum(_)));
    }

    #[test]
    fn maps_groups_and_json_names_are_derived() {
        let file = RawFile::new("shape.proto").package("demo").syntax(Syntax::Proto3).message(
            RawMessage::new("Shape")
                .field(RawField::new("display_name", 1, RawKind::String))
                .optional(RawField::new("nick_name", 2, RawKind::String))
                .oneof(
                    "payment_method",
                    [
                        RawField::new("card", 3, RawKind::String),
                        RawField::new("wallet", 4, RawKind::String),
                    ],
                )
                .map_field("labels", 5, RawKind::String, RawField::new("", 0, RawKind::Int32))
                .field(RawField::new("samples", 6, RawKind::SInt32).repeated()),
        );
        let bundle = link(vec![file]).expect("链接成功");
        let shape = bundle.message(bundle.find_message("demo.Shape").expect("Shape"));

        assert_eq!(shape.fields[0].json_name, "displayName");
        assert!(!shape.fields[0].has_presence);
        assert!(shape.fields[1].has_presence);
        assert_eq!(shape.groups.len(), 2);
        assert!(shape.groups[0].synthetic);
        assert_eq!(shape.groups[1].name, "payment_method");
        assert!(!shape.groups[1].synthetic);
        assert_eq!(shape.groups[1].members, vec![2, 3]);
        assert_eq!(
            shape.fields[4].cardinality,
            Cardinality::Map {
                key: FieldKind::String
            }
        );
        assert_eq!(shape.fields[4].kind, FieldKind::Int32);
        assert!(shape.fields[5].packed);
        assert_eq!(shape.field_by_json_key("display_name").map(|(i, _)| i), Some(0));
    }

    #[test]
    fn bundle_order_is_input_then_declaration_then_depth_first() {
        let first = RawFile::new("1.proto").message(
            RawMessage::new("Outer")
                .nested(RawMessage::new("Inner"))
                .nested(RawMessage::new("Second")),
        );
        let second = RawFile::new("2.proto").message(RawMessage::new("Later"));
        let bundle = link(vec![first, second]).expect("链接成功");
        let names: Vec<_> = bundle
            .messages()
            .map(|(_, message)| message.full_name.as_str())
            .collect();
        assert_eq!(names, ["Outer", "Outer.Inner", "Outer.Second", "Later"]);
    }
}
