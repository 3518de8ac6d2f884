//! 约束校验集成测试：严格字段存在性、声明互斥组、合成互斥组与 proto2 必填字段。

mod support;

use spark_protoserde::Violation;
use spark_protoserde::error::EncodeFailure;
use support::{codec, handle, shop_bundle};

fn violations(failure: EncodeFailure) -> Vec<Violation> {
    match failure {
        EncodeFailure::Violations(report) => report.violations().to_vec(),
        EncodeFailure::Malformed(err) => panic!("期望约束违规，实际为格式错误: {err}"),
    }
}

#[test]
fn strict_mode_lists_every_missing_top_level_key() {
    let bundle = shop_bundle();
    let customer = handle(&bundle, "shop.Customer");

    let failure = codec(true)
        .encode_json(&customer, r#"{"name": "x"}"#)
        .expect_err("缺少 id 与 email");
    assert_eq!(
        violations(failure),
        vec![Violation::MissingKeys {
            message_type: "shop.Customer".into(),
            keys: vec!["id".into(), "email".into()],
        }]
    );
}

#[test]
fn strict_mode_accepts_explicit_nulls_and_original_names() {
    let bundle = shop_bundle();
    let refund = handle(&bundle, "shop.Refund");
    codec(true)
        .encode_json(&refund, r#"{"order_id": "o-1", "amount": null}"#)
        .expect("原始名与 null 均算已写出");

    // 非严格模式下同样的缺键输入可以通过
    let customer = handle(&bundle, "shop.Customer");
    codec(false)
        .encode_json(&customer, r#"{"name": "x"}"#)
        .expect("非严格模式不检查缺键");
}

#[test]
fn unset_declared_group_names_the_group_and_candidates() {
    let bundle = shop_bundle();
    let order = handle(&bundle, "shop.Order");

    let failure = codec(false)
        .encode_json(&order, r#"{"orderId": "o-1"}"#)
        .expect_err("支付方式未设置");
    let found = violations(failure);
    assert_eq!(
        found,
        vec![Violation::ExclusivityUnset {
            message_type: "shop.Order".into(),
            path: String::new(),
            group: "payment_method".into(),
            candidates: vec!["card".into(), "wallet".into()],
        }]
    );
    let rendered = found[0].to_string();
    assert!(rendered.contains("payment_method"));
    assert!(rendered.contains("card, wallet"));

    codec(false)
        .encode_json(&order, r#"{"orderId": "o-1", "card": {"number": "4111"}}"#)
        .expect("设置 card 后应通过");
}

#[test]
fn two_members_of_one_group_are_rejected_during_merge() {
    let bundle = shop_bundle();
    let order = handle(&bundle, "shop.Order");
    let failure = codec(false)
        .encode_json(&order, r#"{"card": {}, "wallet": "w"}"#)
        .expect_err("同组两个成员");
    assert!(matches!(failure, EncodeFailure::Malformed(_)));
}

#[test]
fn synthetic_group_may_stay_empty() {
    let bundle = shop_bundle();
    let order = handle(&bundle, "shop.Order");
    // `note` 是 proto3 optional，所在的合成组不要求成员
    codec(false)
        .encode_json(&order, r#"{"wallet": "w"}"#)
        .expect("合成组零成员合法");
}

#[test]
fn required_fields_are_checked_through_nested_messages() {
    let bundle = shop_bundle();
    let ticket = handle(&bundle, "legacy.Ticket");

    let failure = codec(false)
        .encode_json(&ticket, r#"{"retries": 1, "parent": {"retries": 2, "parent": {"code": "root"}}}"#)
        .expect_err("两层缺少 code");
    assert_eq!(
        violations(failure),
        vec![
            Violation::MissingRequired {
                message_type: "legacy.Ticket".into(),
                path: String::new(),
                fields: vec!["code".into()],
            },
            Violation::MissingRequired {
                message_type: "legacy.Ticket".into(),
                path: "parent".into(),
                fields: vec!["code".into()],
            },
        ]
    );
}

#[test]
fn exclusivity_is_enforced_inside_repeated_messages() {
    use spark_protoserde::bundle::{RawField, RawFile, RawKind, RawMessage, Syntax, link};
    use std::sync::Arc;

    let bundle = Arc::new(
        link(vec![
            RawFile::new("batch.proto")
                .package("batch")
                .syntax(Syntax::Proto3)
                .message(RawMessage::new("Item").oneof(
                    "choice",
                    [
                        RawField::new("text", 1, RawKind::String),
                        RawField::new("number", 2, RawKind::Int32),
                    ],
                ))
                .message(RawMessage::new("Batch").field(RawField::message("items", 1, "Item").repeated())),
        ])
        .expect("批量 schema 可链接"),
    );
    let batch = handle(&bundle, "batch.Batch");
    let failure = codec(false)
        .encode_json(&batch, r#"{"items": [{"text": "a"}, {}]}"#)
        .expect_err("第二项未设置");
    let found = violations(failure);
    assert_eq!(found.len(), 1);
    assert!(matches!(
        &found[0],
        Violation::ExclusivityUnset { path, group, .. } if path == "items[1]" && group == "choice"
    ));
}
