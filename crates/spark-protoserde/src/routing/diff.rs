use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// 两份路由表之间的差异，按类型全名比较（bundle 重载但类型名不变不算变化）。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RouteDiff {
    pub added: BTreeMap<String, String>,
    pub removed: BTreeMap<String, String>,
    /// 通道 → (旧类型, 新类型)
    pub changed: BTreeMap<String, (String, String)>,
    /// 默认类型变化：(旧, 新)
    pub default_changed: Option<(Option<String>, Option<String>)>,
}

impl RouteDiff {
    pub fn between(
        previous: &BTreeMap<String, String>,
        next: &BTreeMap<String, String>,
        previous_default: Option<&str>,
        next_default: Option<&str>,
    ) -> Self {
        let mut diff = RouteDiff::default();
        for (channel, type_name) in next {
            match previous.get(channel) {
                None => {
                    diff.added.insert(channel.clone(), type_name.clone());
                }
                Some(old) if old != type_name => {
                    diff.changed
                        .insert(channel.clone(), (old.clone(), type_name.clone()));
                }
                Some(_) => {}
            }
        }
        for (channel, type_name) in previous {
            if !next.contains_key(channel) {
                diff.removed.insert(channel.clone(), type_name.clone());
            }
        }
        if previous_default != next_default {
            diff.default_changed = Some((
                previous_default.map(str::to_owned),
                next_default.map(str::to_owned),
            ));
        }
        diff
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || !self.removed.is_empty()
            || !self.changed.is_empty()
            || self.default_changed.is_some()
    }
}

impl fmt::Display for RouteDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_changes() {
            return f.write_str("no route changes");
        }
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            let entries: Vec<_> = self
                .added
                .iter()
                .map(|(channel, type_name)| format!("{channel} -> {type_name}"))
                .collect();
            parts.push(format!("added [{}]", entries.join(", ")));
        }
        if !self.removed.is_empty() {
            let entries: Vec<_> = self.removed.keys().cloned().collect();
            parts.push(format!("removed [{}]", entries.join(", ")));
        }
        if !self.changed.is_empty() {
            let entries: Vec<_> = self
                .changed
                .iter()
                .map(|(channel, (old, new))| format!("{channel}: {old} -> {new}"))
                .collect();
            parts.push(format!("changed [{}]", entries.join(", ")));
        }
        if let Some((old, new)) = &self.default_changed {
            parts.push(format!(
                "default {} -> {}",
                old.as_deref().unwrap_or("<none>"),
                new.as_deref().unwrap_or("<none>")
            ));
        }
        f.write_str(&parts.join("; "))
    }
}
