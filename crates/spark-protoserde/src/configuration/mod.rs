//! # configuration 模块说明
//!
//! ## 角色定位（Why）
//! - 宿主只依赖“按键取值”的最小能力，具体配置来自哪里（内存、TOML 文件、上层框架）由调用方决定。
//!
//! ## 契约（What）
//! - [`PropertyResolver`] 返回可选字符串或字符串映射；空白值一律视为缺失；
//! - [`SerdeSettings::from_resolver`] 把原始键值解析为强类型设置，所有错误以
//!   [`ConfigurationError`](crate::error::ConfigurationError) 报告并携带出错的键。

pub mod keys;
mod settings;

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ConfigurationError;

pub use settings::{
    DescriptorSource, RemoteRoutes, RemoteStoreSettings, SerdeSettings, StoreCredentials,
    normalize_endpoint,
};

/// 配置读取接口。
///
/// ### 设计目的（Why）
/// - 把宿主与具体配置框架解耦；测试中可直接使用 [`MapResolver`]。
///
/// ### 契约说明（What）
/// - `property`：返回键对应的标量文本；不存在或空白时返回 `None`；
/// - `map_property`：返回键对应的字符串映射；不存在或为空时返回 `None`；
/// - 实现必须线程安全，宿主可能在任意线程读取。
pub trait PropertyResolver: Send + Sync {
    fn property(&self, key: &str) -> Option<String>;

    fn map_property(&self, key: &str) -> Option<BTreeMap<String, String>>;
}

/// 内存中的配置，主要用于测试与嵌入式场景。
#[derive(Clone, Debug, Default)]
pub struct MapResolver {
    properties: BTreeMap<String, String>,
    maps: BTreeMap<String, BTreeMap<String, String>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_map<K, V>(mut self, key: impl Into<String>, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.maps.insert(
            key.into(),
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }
}

impl PropertyResolver for MapResolver {
    fn property(&self, key: &str) -> Option<String> {
        non_blank(self.properties.get(key)?)
    }

    fn map_property(&self, key: &str) -> Option<BTreeMap<String, String>> {
        let entries = match self.maps.get(key) {
            Some(entries) => entries.clone(),
            // 兼容以 `key.<channel>` 平铺写入的形式
            None => collect_prefixed(&self.properties, key),
        };
        (!entries.is_empty()).then_some(entries)
    }
}

/// 以点分键读取 TOML 文档。
///
/// 嵌套表被展开为 `a.b.c` 形式的键；标量转为文本，数组被忽略。
#[derive(Clone, Debug, Default)]
pub struct TomlResolver {
    entries: BTreeMap<String, String>,
}

impl TomlResolver {
    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        let table: toml::Table = text
            .parse()
            .map_err(|err: toml::de::Error| ConfigurationError::invalid("<toml>", err.message().to_owned()))?;
        let mut entries = BTreeMap::new();
        flatten("", &table, &mut entries);
        Ok(Self { entries })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| ConfigurationError::invalid(path.display().to_string(), err.to_string()))?;
        Self::parse(&text)
    }
}

impl PropertyResolver for TomlResolver {
    fn property(&self, key: &str) -> Option<String> {
        non_blank(self.entries.get(key)?)
    }

    fn map_property(&self, key: &str) -> Option<BTreeMap<String, String>> {
        let entries = collect_prefixed(&self.entries, key);
        (!entries.is_empty()).then_some(entries)
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(inner) => flatten(&path, inner, out),
            toml::Value::String(text) => {
                out.insert(path, text.clone());
            }
            toml::Value::Integer(number) => {
                out.insert(path, number.to_string());
            }
            toml::Value::Float(number) => {
                out.insert(path, number.to_string());
            }
            toml::Value::Boolean(flag) => {
                out.insert(path, flag.to_string());
            }
            toml::Value::Datetime(moment) => {
                out.insert(path, moment.to_string());
            }
            toml::Value::Array(_) => {}
        }
    }
}

fn collect_prefixed(entries: &BTreeMap<String, String>, key: &str) -> BTreeMap<String, String> {
    let prefix = format!("{key}.");
    entries
        .range(prefix.clone()..)
        .take_while(|(name, _)| name.starts_with(&prefix))
        .filter_map(|(name, value)| {
            let value = non_blank(value)?;
            Some((name[prefix.len()..].to_owned(), value))
        })
        .collect()
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}
