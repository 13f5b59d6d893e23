//! # キャッシュ制御ミドルウェア
//!
//! 認証レスポンスやプロキシ応答がブラウザ・中間キャッシュに残らないよう、
//! `Cache-Control: no-store` を全レスポンスに設定する。
//! 下流が返したキャッシュ指定は転送しないため、ここで一律に上書きしてよい。

use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};

/// レスポンスに `Cache-Control: no-store` を付与する
pub async fn no_cache(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
