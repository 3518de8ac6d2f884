//! 恶意或损坏输入：描述符集加载与消息解码都必须以错误返回，而不是 panic 或耗尽栈。

mod support;

use proptest::prelude::*;
use spark_protoserde::BundleLinkError;
use spark_protoserde::bundle::load;
use spark_protoserde::codec::binary::MAX_DEPTH;
use support::{codec, handle, shop_bundle};

/// 一百万个 `StartGroup`（字段 15）标签，逐层嵌套且永不闭合。
fn nested_groups() -> Vec<u8> {
    vec![0x7B; 1_000_000]
}

fn push_varint(out: &mut Vec<u8>, mut value: usize) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// `legacy.Ticket` 沿自引用字段 `parent` 嵌套 `levels` 层，每层都带必填的 `code`。
fn nested_tickets(levels: usize) -> Vec<u8> {
    let mut body = vec![0x0A, 0x01, b'x'];
    for _ in 0..levels {
        let mut outer = vec![0x0A, 0x01, b'x', 0x1A];
        push_varint(&mut outer, body.len());
        outer.extend_from_slice(&body);
        body = outer;
    }
    body
}

#[test]
fn nested_groups_in_a_message_are_a_decode_error() {
    let bundle = shop_bundle();
    let customer = handle(&bundle, "shop.Customer");
    let err = codec(false)
        .decode_to_json(&customer, &nested_groups())
        .expect_err("无法闭合的分组不是合法载荷");
    assert!(!err.detail.is_empty());
}

#[test]
fn nested_groups_in_a_descriptor_set_are_malformed() {
    let err = load(&nested_groups()).expect_err("无法闭合的分组不是合法描述符集");
    assert!(matches!(err, BundleLinkError::Malformed(_)), "{err}");
}

#[test]
fn message_nesting_is_capped() {
    let bundle = shop_bundle();
    let ticket = handle(&bundle, "legacy.Ticket");
    let codec = codec(false);

    codec
        .decode(&ticket, &nested_tickets(MAX_DEPTH))
        .expect("恰好达到上限的嵌套可以解码");

    let err = codec
        .decode(&ticket, &nested_tickets(MAX_DEPTH + 1))
        .expect_err("超过上限的嵌套被拒绝");
    assert!(err.detail.contains("nesting"), "{err}");
    assert!(err.path.starts_with("parent"), "{err}");
}

#[test]
fn truncated_payloads_name_the_field() {
    let bundle = shop_bundle();
    let customer = handle(&bundle, "shop.Customer");
    let err = codec(false)
        .decode(&customer, &[0x12, 0x05, b'a'])
        .expect_err("长度前缀越界");
    assert_eq!(err.path, "name");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn arbitrary_bytes_never_panic_the_loader(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = load(&bytes);
    }

    #[test]
    fn arbitrary_bytes_never_panic_the_decoder(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let bundle = shop_bundle();
        let order = handle(&bundle, "shop.Order");
        let _ = codec(false).decode_to_json(&order, &bytes);
    }
}
