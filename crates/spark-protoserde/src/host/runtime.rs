use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bundle::{MessageHandle, SchemaBundle};
use crate::codec::MessageCodec;
use crate::configuration::{DescriptorSource, SerdeSettings, keys};
use crate::error::{ConfigurationError, Error, FetchCause, RemoteFetchError, Result};
use crate::routing::{RouteDiff, RouteTable, Router, UnresolvedRoute, resolve_type_name};
use crate::scheduler::{JobError, RefreshJob};
use crate::source::{
    AdaptiveCache, BundleParser, BundleSource, FileSystemStore, ObjectLocation, ObjectStore,
    RouteMapParser, RouteMapSource,
};

/// 当前生效的输入组合，用于判断刷新是否真的带来了新内容。
struct Published {
    bundle: Arc<SchemaBundle>,
    remote_routes: Arc<BTreeMap<String, String>>,
}

/// 宿主共享状态：来源缓存、路由器与编解码器。
///
/// 消息路径只读取 `router`；刷新路径构建新表后整体发布。
/// 刷新轮次经 `refresh_gate` 串行化，路由表与 `published` 总是来自同一轮。
pub(crate) struct SerdeRuntime {
    pub(crate) settings: SerdeSettings,
    bundle_source: BundleSource,
    route_source: Option<RouteMapSource>,
    pub(crate) router: Router,
    published: ArcSwap<Published>,
    refresh_gate: Mutex<()>,
    pub(crate) codec: MessageCodec,
}

impl SerdeRuntime {
    /// 冷加载：任何来源失败都是致命的。
    pub(crate) async fn initialize(
        settings: SerdeSettings,
        remote_store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self> {
        let bundle_source = match &settings.descriptor {
            DescriptorSource::LocalFile { path, refresh_interval } => AdaptiveCache::new(
                Arc::new(FileSystemStore::default()),
                ObjectLocation::new("", path.to_string_lossy()),
                *refresh_interval,
                BundleParser,
            ),
            DescriptorSource::Remote { location, refresh_interval } => AdaptiveCache::new(
                require_store(remote_store.as_ref())?,
                location.clone(),
                *refresh_interval,
                BundleParser,
            ),
        };
        let route_source = match &settings.remote_routes {
            Some(routes) => Some(AdaptiveCache::new(
                require_store(remote_store.as_ref())?,
                routes.location.clone(),
                routes.refresh_interval,
                RouteMapParser,
            )),
            None => None,
        };

        let bundle = bundle_source.load().await.map_err(cold_failure)?;
        let remote_routes = match &route_source {
            Some(source) => source.load().await?,
            None => Arc::new(BTreeMap::new()),
        };

        let default = match &settings.default_type {
            Some(type_name) => Some(resolve_type_name(&bundle, type_name).ok_or_else(|| {
                ConfigurationError::invalid(
                    keys::DEFAULT_TYPE,
                    format!("type `{type_name}` is not defined in the schema bundle"),
                )
            })?),
            None => None,
        };
        let (table, unresolved) = RouteTable::build(&bundle, &remote_routes, &settings.local_routes, default);
        report_unresolved(&unresolved);
        info!(
            source = %bundle_source.describe(),
            files = bundle.files().len(),
            routes = table.len(),
            "schema bundle loaded"
        );

        Ok(Self {
            codec: MessageCodec::new(settings.strict_field_presence),
            router: Router::new(table),
            published: ArcSwap::from_pointee(Published { bundle, remote_routes }),
            refresh_gate: Mutex::new(()),
            bundle_source,
            route_source,
            settings,
        })
    }

    pub(crate) fn bundle(&self) -> Arc<SchemaBundle> {
        Arc::clone(&self.published.load().bundle)
    }

    /// 重新加载两个来源；只有内容真正变化时才重建并发布路由表。
    ///
    /// 来源失败由缓存降级吸收，因此首次加载成功后这里实际上不会返回错误：
    /// 失败的来源继续提供旧快照，结果可能是 `None`，也可能是只反映另一来源变化的差异。
    ///
    /// 并发调用按到达顺序排队；后到的一轮看到的是前一轮已发布的状态。
    pub(crate) async fn refresh(&self) -> Result<Option<RouteDiff>> {
        let _round = self.refresh_gate.lock().await;
        let bundle = self.bundle_source.load().await?;
        let current = self.published.load_full();
        let remote_routes = match &self.route_source {
            Some(source) => source.load().await?,
            None => Arc::clone(&current.remote_routes),
        };

        if Arc::ptr_eq(&bundle, &current.bundle) && Arc::ptr_eq(&remote_routes, &current.remote_routes) {
            debug!("sources unchanged, keeping current route table");
            return Ok(None);
        }

        let default = self.resolve_default(&bundle);
        let (table, unresolved) =
            RouteTable::build(&bundle, &remote_routes, &self.settings.local_routes, default);
        report_unresolved(&unresolved);

        let diff = self.router.publish(table);
        self.published.store(Arc::new(Published { bundle, remote_routes }));
        info!(changes = %diff, "route table republished");
        Ok(Some(diff))
    }

    pub(crate) fn invalidate(&self) {
        self.bundle_source.invalidate();
        if let Some(source) = &self.route_source {
            source.invalidate();
        }
    }

    fn resolve_default(&self, bundle: &Arc<SchemaBundle>) -> Option<MessageHandle> {
        let type_name = self.settings.default_type.as_deref()?;
        let resolved = resolve_type_name(bundle, type_name);
        if resolved.is_none() {
            warn!(type_name, "default type missing from refreshed bundle, unmapped channels will fail");
        }
        resolved
    }
}

/// 后台刷新任务：一轮即一次 [`SerdeRuntime::refresh`]。
pub(crate) struct RuntimeRefresh(pub(crate) Arc<SerdeRuntime>);

#[async_trait]
impl RefreshJob for RuntimeRefresh {
    async fn run(&self) -> std::result::Result<(), JobError> {
        self.0.refresh().await?;
        Ok(())
    }
}

fn require_store(store: Option<&Arc<dyn ObjectStore>>) -> Result<Arc<dyn ObjectStore>, ConfigurationError> {
    store
        .cloned()
        .ok_or_else(|| ConfigurationError::missing(keys::STORE_ENDPOINT))
}

/// 冷加载时描述符链接失败单独归类，便于区分“拉不到”与“拉到了但不合法”。
fn cold_failure(err: RemoteFetchError) -> Error {
    let RemoteFetchError { location, cause } = err;
    match cause {
        FetchCause::Link(link) => Error::BundleLink(link),
        cause => Error::RemoteFetch(RemoteFetchError { location, cause }),
    }
}

fn report_unresolved(unresolved: &[UnresolvedRoute]) {
    for route in unresolved {
        warn!(
            channel = %route.channel,
            type_name = %route.type_name,
            "channel mapping refers to an unknown type, skipping"
        );
    }
}
