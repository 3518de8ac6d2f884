//! 宿主门面的端到端生命周期：冷加载、按通道编解码、刷新与降级。

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spark_protoserde::bundle::encode_descriptor_set;
use spark_protoserde::configuration::keys;
use spark_protoserde::source::{InMemoryObjectStore, ObjectLocation};
use spark_protoserde::{Error, MapResolver, ProtoSerde, RouteNotFoundError, Target};

fn bundle_location() -> ObjectLocation {
    ObjectLocation::new("schemas", "bundle.pb")
}

fn routes_location() -> ObjectLocation {
    ObjectLocation::new("schemas", "routes.json")
}

fn seeded_store() -> Arc<InMemoryObjectStore> {
    let store = Arc::new(InMemoryObjectStore::new());
    store.put(&bundle_location(), support::shop_descriptor_set());
    store.put(
        &routes_location(),
        json!({"orders": "shop.Order", "refunds": "shop.Refund"}).to_string(),
    );
    store
}

fn remote_config() -> MapResolver {
    MapResolver::new()
        .with(keys::STORE_ENDPOINT, "http://objects.internal:9000")
        .with(keys::DESCRIPTOR_BUCKET, "schemas")
        .with(keys::DESCRIPTOR_OBJECT_KEY, "bundle.pb")
        .with(keys::ROUTES_BUCKET, "schemas")
        .with(keys::ROUTES_OBJECT_KEY, "routes.json")
        .with_map(keys::LOCAL_ROUTES, [("refunds", "shop.Customer")])
}

async fn configured(store: &Arc<InMemoryObjectStore>, resolver: MapResolver) -> ProtoSerde {
    ProtoSerde::configure_with_store(&resolver, Arc::clone(store) as _)
        .await
        .expect("冷加载成功")
}

#[tokio::test]
async fn serializes_and_deserializes_through_channel_routes() {
    let store = seeded_store();
    let host = configured(&store, remote_config()).await;

    let serializer = host.serializer("orders", Target::Value).expect("value 侧可用");
    let bytes = serializer
        .serialize(r#"{"orderId": "o-7", "wallet": "w-1", "tags": ["a"]}"#)
        .expect("编码成功");

    let deserializer = host.deserializer("orders", Target::Value).expect("value 侧可用");
    let decoded = deserializer.deserialize(&bytes).expect("解码成功");
    let value: serde_json::Value = serde_json::from_str(&decoded.text).expect("输出为 JSON");
    assert_eq!(value["orderId"], "o-7");
    assert_eq!(value["wallet"], "w-1");
    assert_eq!(value["tags"], json!(["a"]));
    assert_eq!(decoded.metadata.get("messageType").map(String::as_str), Some("shop.Order"));
    assert_eq!(decoded.metadata.get("file").map(String::as_str), Some("shop.proto"));
}

#[tokio::test]
async fn local_routes_override_remote_ones() {
    let store = seeded_store();
    let host = configured(&store, remote_config()).await;

    let table = host.route_table();
    assert_eq!(table.resolve("refunds").map(|handle| handle.full_name()), Some("shop.Customer"));
    assert_eq!(table.resolve("orders").map(|handle| handle.full_name()), Some("shop.Order"));
    assert!(host.can_route("orders"));
    assert!(!host.can_route("audits"));
}

#[tokio::test]
async fn routing_failures_are_reported_per_call() {
    let store = seeded_store();
    let host = configured(&store, remote_config()).await;

    let err = host.serializer("orders", Target::Key).expect_err("key 侧不支持");
    assert!(matches!(err, RouteNotFoundError::UnsupportedTarget { .. }));

    let unmapped = host.serializer("audits", Target::Value).expect("创建不做路由");
    let err = unmapped.serialize("{}").expect_err("无路由且无默认类型");
    assert!(matches!(err, Error::RouteNotFound(RouteNotFoundError::Unmapped { channel }) if channel == "audits"));

    let with_default = configured(&store, remote_config().with(keys::DEFAULT_TYPE, "Card")).await;
    let bytes = with_default
        .serializer("audits", Target::Value)
        .expect("value 侧可用")
        .serialize(r#"{"number": "4111"}"#)
        .expect("回落到默认类型");
    assert_eq!(bytes, vec![0x0a, 0x04, b'4', b'1', b'1', b'1']);
}

#[tokio::test]
async fn codec_failures_name_channel_and_type() {
    let store = seeded_store();
    let host = configured(&store, remote_config()).await;

    let err = host
        .serializer("orders", Target::Value)
        .expect("value 侧可用")
        .serialize(r#"{"orderId": "o-1"}"#)
        .expect_err("支付方式缺失");
    let Error::Encode(encode) = err else {
        panic!("期望编码错误，实际为 {err:?}");
    };
    assert_eq!(encode.channel, "orders");
    assert_eq!(encode.message_type, "shop.Order");
    assert!(encode.violations().is_some());

    let err = host
        .deserializer("orders", Target::Value)
        .expect("value 侧可用")
        .deserialize(&[0xff])
        .expect_err("截断的载荷");
    assert!(matches!(err, Error::Decode(decode) if decode.message_type == "shop.Order"));
}

#[tokio::test]
async fn cold_start_failures_are_fatal() {
    let empty = Arc::new(InMemoryObjectStore::new());
    let err = ProtoSerde::configure_with_store(&remote_config(), Arc::clone(&empty) as _)
        .await
        .err()
        .expect("没有描述符集");
    assert!(matches!(err, Error::RemoteFetch(_)));

    let broken = seeded_store();
    broken.put(&bundle_location(), &b"\x0a\x05ab"[..]);
    let err = ProtoSerde::configure_with_store(&remote_config(), Arc::clone(&broken) as _)
        .await
        .err()
        .expect("描述符集损坏");
    assert!(matches!(err, Error::BundleLink(_)));

    let store = seeded_store();
    let err = ProtoSerde::configure_with_store(
        &remote_config().with(keys::DEFAULT_TYPE, "shop.Missing"),
        Arc::clone(&store) as _,
    )
    .await
    .err()
    .expect("默认类型不存在");
    assert!(matches!(err, Error::Configuration(config) if config.key == keys::DEFAULT_TYPE));
}

#[tokio::test]
async fn refresh_publishes_changes_and_reports_a_diff() {
    let store = seeded_store();
    let host = configured(&store, remote_config()).await;

    assert!(host.refresh().await.expect("区间内刷新").is_none());

    store.put(
        &routes_location(),
        json!({"orders": "shop.Refund", "audits": "shop.Customer"}).to_string(),
    );
    host.invalidate_caches();
    let diff = host
        .refresh()
        .await
        .expect("刷新成功")
        .expect("路由表有变化");
    assert_eq!(
        diff.changed.get("orders"),
        Some(&("shop.Order".to_owned(), "shop.Refund".to_owned()))
    );
    assert_eq!(diff.added.get("audits").map(String::as_str), Some("shop.Customer"));
    // `refunds` 由本地映射提供，远端删除不影响
    assert!(diff.removed.is_empty());

    let bytes = host
        .serializer("orders", Target::Value)
        .expect("value 侧可用")
        .serialize(r#"{"orderId": "o-1", "amount": "5"}"#)
        .expect("已有序列化器使用新路由");
    assert!(!bytes.is_empty());
}

#[tokio::test]
async fn refresh_during_an_outage_keeps_serving() {
    let store = seeded_store();
    let host = configured(&store, remote_config()).await;
    let before = host.bundle();

    store.set_outage(true);
    host.invalidate_caches();
    assert!(host.refresh().await.expect("降级不报错").is_none());
    assert!(Arc::ptr_eq(&before, &host.bundle()));
    host
        .serializer("orders", Target::Value)
        .expect("value 侧可用")
        .serialize(r#"{"wallet": "w"}"#)
        .expect("故障期间仍可编码");
}

#[tokio::test]
async fn malformed_remote_bundle_keeps_the_last_good_one() {
    let store = seeded_store();
    let host = configured(&store, remote_config()).await;
    let before = host.bundle();

    store.put(&bundle_location(), vec![0x7B_u8; 1_000_000]);
    host.invalidate_caches();
    assert!(host.refresh().await.expect("坏的描述符集不致命").is_none());
    assert!(Arc::ptr_eq(&before, &host.bundle()));
    host
        .serializer("orders", Target::Value)
        .expect("value 侧可用")
        .serialize(r#"{"orderId": "o-2"}"#)
        .expect("继续使用旧 bundle 编码");

    store.put(&bundle_location(), support::shop_descriptor_set());
    host.invalidate_caches();
    host.refresh().await.expect("修复后刷新成功");
    assert!(!Arc::ptr_eq(&before, &host.bundle()), "修复后的对象应被重新加载");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_publish_one_consistent_state() {
    let store = seeded_store();
    let host = Arc::new(configured(&store, remote_config()).await);
    let variants = [
        support::shop_descriptor_set(),
        encode_descriptor_set(&[support::shop_file(), support::common_file()]),
    ];

    for round in 0..24_usize {
        store.put(&bundle_location(), variants[round % 2].clone());
        let round_target = if round % 3 == 0 { "shop.Refund" } else { "shop.Card" };
        store.put(
            &routes_location(),
            json!({"orders": "shop.Order", "round": round_target}).to_string(),
        );
        host.invalidate_caches();

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let host = Arc::clone(&host);
                tokio::spawn(async move {
                    host.invalidate_caches();
                    host.refresh().await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("刷新任务不应 panic").expect("刷新不报错");
        }

        let bundle = host.bundle();
        for (channel, handle) in host.route_table().routes() {
            assert!(
                Arc::ptr_eq(handle.bundle(), &bundle),
                "round {round}: route `{channel}` points at a bundle that is not the published one"
            );
        }
        assert!(
            host.refresh().await.expect("区间内刷新").is_none(),
            "round {round}: published inputs lag behind the cached sources"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn background_refresh_picks_up_remote_changes() {
    let store = seeded_store();
    let host = configured(
        &store,
        remote_config()
            .with(keys::DESCRIPTOR_REMOTE_REFRESH_SECONDS, "5")
            .with(keys::ROUTES_REFRESH_SECONDS, "5"),
    )
    .await;
    assert_eq!(host.settings().background_refresh, Duration::from_secs(5));

    host.start_background_refresh().await;
    assert!(host.is_refreshing());
    store.put(&routes_location(), json!({"orders": "shop.Refund"}).to_string());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(
        host.route_table().resolve("orders").map(|handle| handle.full_name()),
        Some("shop.Refund")
    );
    assert!(host.scheduler_stats().runs >= 1);
    assert_eq!(host.scheduler_stats().failures, 0);

    host.shutdown().await;
    assert!(!host.is_refreshing());
}

#[tokio::test]
async fn local_descriptor_file_needs_no_remote_store() {
    let dir = tempfile::tempdir().expect("临时目录");
    let path = dir.path().join("bundle.pb");
    tokio::fs::write(&path, support::shop_descriptor_set())
        .await
        .expect("写入描述符集");

    let resolver = MapResolver::new()
        .with(keys::DESCRIPTOR_FILE, path.to_string_lossy())
        .with(keys::STRICT_FIELD_PRESENCE, "true")
        .with_map(keys::LOCAL_ROUTES, [("customers", "shop.Customer")]);
    let host = ProtoSerde::configure(&resolver).await.expect("本地文件冷加载");

    let serializer = host.serializer("customers", Target::Value).expect("value 侧可用");
    let err = serializer.serialize(r#"{"name": "x"}"#).expect_err("严格模式缺键");
    assert!(matches!(err, Error::Encode(_)));
    serializer
        .serialize(r#"{"id": "1", "name": "x", "email": null}"#)
        .expect("键齐全即可");
}
