//! # 画像ハンドラ
//!
//! - `POST /images/upload?folder=` - マルチパートボディを画像サービスへストリーミング転送
//! - `DELETE /images?objectName=` - 画像の削除を転送
//!
//! アップロードはボディを再送できないため、トークンのリフレッシュを行わない。
//! 期限間近・期限切れのセッションには `requiresRefresh` 付きの 401 を返し、
//! 呼び出し元に再認証とやり直しを求める。

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Method, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use storefront_shared::{event_log::event, log_business_event};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::proxy::{ProxyState, forward_with_retry, forwarded_headers, relay, resolve_session};
use crate::{
    client::{ForwardRequest, UploadRequest},
    cookie,
    error::{
        log_and_convert_gateway_error,
        payload_too_large_response,
        unauthorized_response,
        validation_error_response,
    },
};

/// 既定のアップロード先フォルダ
const DEFAULT_FOLDER: &str = "products";

/// 画像サービスのアップロード API のパス
const IMAGES_API_PATH: &str = "/api/GoogleCloudImageUpload";

/// ボディを中継するチャネルのバッファ（チャンク数）
const UPLOAD_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub folder: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteImageQuery {
    pub object_name: Option<String>,
}

/// POST /images/upload
#[tracing::instrument(skip_all)]
pub async fn upload_image(
    State(state): State<Arc<ProxyState>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Body,
) -> Response {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .filter(|v| is_multipart(v.to_str().unwrap_or_default()))
        .cloned()
    else {
        return validation_error_response("Content-Type は multipart/form-data である必要があります");
    };

    if content_length(&headers).is_some_and(|len| len > state.upload_max_bytes as u64) {
        return payload_too_large_response(state.upload_max_bytes);
    }

    let Some(session_id) = cookie::session_id(&jar) else {
        return unauthorized_response();
    };
    let session = match state.sessions.resolve_without_refresh(&session_id).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    let folder = query
        .folder
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FOLDER.to_string());
    let url = format!(
        "{}{IMAGES_API_PATH}/upload?{}",
        state.images_url,
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("folder", &folder)
            .finish()
    );

    let exceeded = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel(UPLOAD_CHANNEL_CAPACITY);
    tokio::spawn(pump_body(
        body.into_data_stream(),
        tx,
        state.upload_max_bytes,
        exceeded.clone(),
    ));

    let result = state
        .gateway
        .upload(UploadRequest {
            url,
            bearer: session.tokens.access_token().to_string(),
            headers: forwarded_headers(&headers),
            content_type,
            body: ReceiverStream::new(rx),
        })
        .await;

    if exceeded.load(Ordering::SeqCst) {
        return payload_too_large_response(state.upload_max_bytes);
    }

    match result {
        Ok(response) => {
            let outcome = if response.status.is_success() {
                event::result::SUCCESS
            } else {
                event::result::FAILURE
            };
            log_business_event!(
                event.category = event::category::PROXY,
                event.action = event::action::UPLOAD_FORWARDED,
                event.entity_type = event::entity_type::IMAGE,
                event.result = outcome,
                upstream.status = response.status.as_u16(),
                "画像アップロードを転送しました"
            );
            relay(response)
        }
        Err(e) => log_and_convert_gateway_error("画像アップロード", e),
    }
}

/// DELETE /images
#[tracing::instrument(skip_all)]
pub async fn delete_image(
    State(state): State<Arc<ProxyState>>,
    Query(query): Query<DeleteImageQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let Some(object_name) = query.object_name.filter(|n| !n.trim().is_empty()) else {
        return validation_error_response("objectName は必須です");
    };

    let session = match resolve_session(&state.sessions, &jar).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let request = ForwardRequest {
        method:       Method::DELETE,
        url:          format!(
            "{}{IMAGES_API_PATH}?{}",
            state.images_url,
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair("objectName", &object_name)
                .finish()
        ),
        bearer:       Some(session.tokens.access_token().to_string()),
        headers:      forwarded_headers(&headers),
        content_type: None,
        body:         None,
    };

    forward_with_retry(&state, request, Some(session)).await
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// 受信ボディを数えながらチャネルへ流す
///
/// 上限を超えた時点で `exceeded` を立て、エラーを流して転送を打ち切る。
/// 受信側（転送中の HTTP リクエスト）が破棄されたら読み出しをやめる。
async fn pump_body<S, E>(
    mut stream: S,
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    limit: usize,
    exceeded: Arc<AtomicBool>,
) where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut total = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(io::Error::other(e))).await;
                return;
            }
        };

        total = total.saturating_add(chunk.len());
        if total > limit {
            exceeded.store(true, Ordering::SeqCst);
            let _ = tx
                .send(Err(io::Error::other("アップロードサイズの上限を超えました")))
                .await;
            return;
        }

        if tx.send(Ok(chunk)).await.is_err() {
            return;
        }
    }
}
