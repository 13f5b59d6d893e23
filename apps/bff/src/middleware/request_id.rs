//! # Request ID の外向き伝播
//!
//! BFF が受けたリクエストの `X-Request-Id` を、ID プロバイダ・内部ゲートウェイ・
//! 画像サービスへの呼び出しにも付ける。
//!
//! 値は [`store_request_id`] がリクエストの処理中だけ task-local に置き、
//! reqwest クライアント側で [`inject_request_id`] が読み出す。
//! クライアントトレイトの引数を増やさずに済み、スタブ実装はこれを意識しない。
//!
//! ブラウザから届いた `X-Request-Id` ヘッダーそのものは転送ヘッダーに含めない。
//! `SetRequestIdLayer` が確定させた値だけが下流へ流れる。

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use storefront_shared::observability::REQUEST_ID_HEADER;
use tower_http::request_id::RequestId;

tokio::task_local! {
    static REQUEST_ID: Option<HeaderValue>;
}

/// 処理中のリクエストの Request ID
///
/// ミドルウェアの外（起動処理・単体テスト）や、ID が付いていないリクエストでは `None`。
pub fn current_request_id() -> Option<HeaderValue> {
    REQUEST_ID.try_with(Clone::clone).ok().flatten()
}

/// `SetRequestIdLayer` が付けた ID をハンドラの実行中だけ task-local に置く
pub async fn store_request_id(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.header_value().clone());

    REQUEST_ID.scope(request_id, next.run(request)).await
}

/// 下流への reqwest リクエストに `X-Request-Id` を付ける
pub fn inject_request_id(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match current_request_id() {
        Some(id) => builder.header(REQUEST_ID_HEADER, id),
        None => builder,
    }
}
