//! 集成测试共享夹具：一份覆盖标量、repeated、map、嵌套、互斥组与 proto2 必填字段的小型商店 schema。
#![allow(dead_code)]

use std::sync::Arc;

use spark_protoserde::bundle::{
    RawEnum, RawField, RawFile, RawKind, RawMessage, SchemaBundle, Syntax, encode_descriptor_set,
    link,
};
use spark_protoserde::{MessageHandle, MessageCodec};

/// `common.proto`：被 `shop.proto` 依赖的地址类型。
pub fn common_file() -> RawFile {
    RawFile::new("common.proto")
        .package("common")
        .syntax(Syntax::Proto3)
        .message(
            RawMessage::new("Address")
                .field(RawField::new("street", 1, RawKind::String))
                .field(RawField::new("city", 2, RawKind::String)),
        )
}

/// `shop.proto`：订单、客户与支付方式。
pub fn shop_file() -> RawFile {
    RawFile::new("shop.proto")
        .package("shop")
        .syntax(Syntax::Proto3)
        .depends_on("common.proto")
        .enumeration(
            RawEnum::new("Status")
                .value("STATUS_UNKNOWN", 0)
                .value("PAID", 1)
                .value("SHIPPED", 2),
        )
        .message(
            RawMessage::new("Customer")
                .field(RawField::new("id", 1, RawKind::Int64))
                .field(RawField::new("name", 2, RawKind::String))
                .field(RawField::new("email", 3, RawKind::String)),
        )
        .message(RawMessage::new("Card").field(RawField::new("number", 1, RawKind::String)))
        .message(
            RawMessage::new("Order")
                .field(RawField::new("order_id", 1, RawKind::String))
                .field(RawField::new("tags", 2, RawKind::String).repeated())
                .map_field("quantities", 3, RawKind::String, RawField::new("value", 2, RawKind::Int32))
                .field(RawField::message("shipping", 4, "common.Address"))
                .field(RawField::enumeration("status", 5, "Status"))
                .oneof(
                    "payment_method",
                    [
                        RawField::message("card", 6, "Card"),
                        RawField::new("wallet", 7, RawKind::String),
                    ],
                )
                .optional(RawField::new("note", 8, RawKind::String))
                .field(RawField::message("history", 9, ".common.Address").repeated())
                .field(RawField::new("signature", 10, RawKind::Bytes))
                .field(RawField::new("total", 11, RawKind::Double))
                .field(RawField::new("lines", 12, RawKind::UInt32).repeated()),
        )
        .message(
            RawMessage::new("Refund")
                .field(RawField::new("order_id", 1, RawKind::String))
                .field(RawField::new("amount", 2, RawKind::SInt64)),
        )
}

/// `legacy.proto`：proto2，带必填字段。
pub fn legacy_file() -> RawFile {
    RawFile::new("legacy.proto")
        .package("legacy")
        .message(
            RawMessage::new("Ticket")
                .field(RawField::new("code", 1, RawKind::String).required())
                .field(RawField::new("retries", 2, RawKind::Int32))
                .field(RawField::message("parent", 3, "Ticket")),
        )
}

pub fn shop_files() -> Vec<RawFile> {
    vec![shop_file(), common_file(), legacy_file()]
}

/// 编码后的描述符集字节，供对象存储夹具使用。
pub fn shop_descriptor_set() -> Vec<u8> {
    encode_descriptor_set(&shop_files())
}

pub fn shop_bundle() -> Arc<SchemaBundle> {
    Arc::new(link(shop_files()).expect("商店 schema 应可链接"))
}

pub fn handle(bundle: &Arc<SchemaBundle>, full_name: &str) -> MessageHandle {
    bundle.handle(full_name).expect("类型应存在")
}

pub fn codec(strict: bool) -> MessageCodec {
    MessageCodec::new(strict)
}
