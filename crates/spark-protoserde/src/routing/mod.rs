//! # routing 模块说明
//!
//! ## 角色定位（Why）
//! - 把“通道名”翻译为“消息类型”：远端路由表提供基线，本地覆盖项总是胜出，未映射通道回落到默认类型。
//!
//! ## 设计要求（What）
//! - 类型名解析：先按全名精确匹配（容忍前导 `.`），再按简单名在 bundle 遍历顺序中取第一个匹配；
//!   存在多个同名候选时记录告警。
//! - 只服务 value 侧；key 侧请求显式返回 [`RouteNotFoundError::UnsupportedTarget`]。
//!
//! ## 并发（How）
//! - [`Router`] 以 `ArcSwap<RouteTable>` 承载快照：读路径零锁，写路径整表替换，与 bundle 刷新对齐。

mod diff;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::warn;

pub use diff::RouteDiff;

use crate::bundle::{MessageHandle, SchemaBundle};
use crate::error::RouteNotFoundError;

/// 载荷所处位置。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Key,
    Value,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Target::Key => "key",
            Target::Value => "value",
        })
    }
}

/// 构建路由表时无法解析的条目。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedRoute {
    pub channel: String,
    pub type_name: String,
}

/// 已解析的路由快照。
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, MessageHandle>,
    default: Option<MessageHandle>,
}

impl RouteTable {
    /// 叠加 `remote` 与 `local`（本地胜出）并解析每个类型名。
    ///
    /// 解析失败的条目被跳过并通过返回值报告，交由调用方记录。
    pub fn build(
        bundle: &Arc<SchemaBundle>,
        remote: &BTreeMap<String, String>,
        local: &BTreeMap<String, String>,
        default: Option<MessageHandle>,
    ) -> (Self, Vec<UnresolvedRoute>) {
        let mut combined = remote.clone();
        combined.extend(local.iter().map(|(channel, type_name)| (channel.clone(), type_name.clone())));

        let mut routes = BTreeMap::new();
        let mut unresolved = Vec::new();
        for (channel, type_name) in combined {
            match resolve_type_name(bundle, &type_name) {
                Some(handle) => {
                    routes.insert(channel, handle);
                }
                None => unresolved.push(UnresolvedRoute { channel, type_name }),
            }
        }
        (Self { routes, default }, unresolved)
    }

    /// 通道条目优先，其次默认类型。
    pub fn resolve(&self, channel: &str) -> Option<&MessageHandle> {
        self.routes.get(channel).or(self.default.as_ref())
    }

    pub fn routes(&self) -> impl Iterator<Item = (&str, &MessageHandle)> {
        self.routes
            .iter()
            .map(|(channel, handle)| (channel.as_str(), handle))
    }

    pub fn default_type(&self) -> Option<&MessageHandle> {
        self.default.as_ref()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// 通道 → 类型全名。
    pub fn type_names(&self) -> BTreeMap<String, String> {
        self.routes
            .iter()
            .map(|(channel, handle)| (channel.clone(), handle.full_name().to_owned()))
            .collect()
    }

    pub fn diff(&self, next: &RouteTable) -> RouteDiff {
        RouteDiff::between(
            &self.type_names(),
            &next.type_names(),
            self.default.as_ref().map(MessageHandle::full_name),
            next.default.as_ref().map(MessageHandle::full_name),
        )
    }
}

/// 把配置中的类型名解析为 bundle 内的消息类型。
pub fn resolve_type_name(bundle: &Arc<SchemaBundle>, type_name: &str) -> Option<MessageHandle> {
    let type_name = type_name.trim();
    if let Some(handle) = bundle.handle(type_name) {
        return Some(handle);
    }

    let mut candidates = bundle
        .messages()
        .filter(|(_, message)| !message.map_entry && message.name == type_name);
    let (id, first) = candidates.next()?;
    let others: Vec<&str> = candidates.map(|(_, message)| message.full_name.as_str()).collect();
    if !others.is_empty() {
        warn!(
            type_name,
            chosen = %first.full_name,
            ignored = ?others,
            "ambiguous simple type name, using the first match in bundle order"
        );
    }
    Some(MessageHandle::new(Arc::clone(bundle), id))
}

/// 可热替换的路由器。
pub struct Router {
    table: ArcSwap<RouteTable>,
}

impl Router {
    pub fn new(table: RouteTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    pub fn route(&self, channel: &str, target: Target) -> Result<MessageHandle, RouteNotFoundError> {
        if target == Target::Key {
            return Err(RouteNotFoundError::UnsupportedTarget {
                channel: channel.to_owned(),
                target: target.to_string(),
            });
        }
        self.table
            .load()
            .resolve(channel)
            .cloned()
            .ok_or_else(|| RouteNotFoundError::Unmapped {
                channel: channel.to_owned(),
            })
    }

    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// 整表替换，返回与旧表的差异。
    pub fn publish(&self, table: RouteTable) -> RouteDiff {
        let next = Arc::new(table);
        let previous = self.table.swap(Arc::clone(&next));
        previous.diff(&next)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.table.load().len())
            .finish()
    }
}
