//! # ゲートウェイクライアント
//!
//! 認証済みリクエストを内部ゲートウェイ（および画像サービス）へ転送する。
//!
//! - [`GatewayClient::forward`] - ボディをバッファ済みの通常リクエスト
//! - [`GatewayClient::upload`] - マルチパートボディをストリーミングで転送
//!
//! 下流のステータスはそのまま呼び出し元に返す。ここでエラーになるのは
//! 接続失敗・タイムアウト・その他の通信エラーのみ。

use std::{io, time::Duration};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use bytes::Bytes;
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;

use crate::middleware::request_id::inject_request_id;

/// TCP 接続確立のタイムアウト
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// ゲートウェイクライアントエラー
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// 接続できない
    #[error("下流サービスに接続できません")]
    Unavailable,

    #[error("下流サービスの応答がタイムアウトしました")]
    Timeout,

    /// その他の通信エラー（ボディ送信の中断等）
    #[error("予期しないエラー: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_connect() {
            GatewayError::Unavailable
        } else {
            GatewayError::Unexpected(err.to_string())
        }
    }
}

// --- リクエスト/レスポンス型 ---

/// ストリーミングで転送するアップロードボディ
///
/// チャネルの受信側。送信側はリクエストボディを読み出すタスクが持つ。
pub type UploadBody = ReceiverStream<Result<Bytes, io::Error>>;

/// 転送するリクエスト
///
/// 再試行（リアクティブリフレッシュ後）のため `Clone` できる。
#[derive(Clone)]
pub struct ForwardRequest {
    pub method:       Method,
    /// クエリ文字列を含む完全な URL
    pub url:          String,
    /// `Authorization: Bearer` に載せるアクセストークン（不要なら `None`）
    pub bearer:       Option<String>,
    /// 転送を許可したヘッダーのみ
    pub headers:      HeaderMap,
    pub content_type: Option<HeaderValue>,
    pub body:         Option<Bytes>,
}

impl std::fmt::Debug for ForwardRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("bearer", &self.bearer.as_ref().map(|_| storefront_domain::REDACTED))
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish_non_exhaustive()
    }
}

/// ストリーミングアップロードのリクエスト
pub struct UploadRequest {
    pub url:          String,
    pub bearer:       String,
    pub headers:      HeaderMap,
    /// 元のマルチパート `Content-Type`（boundary を含む）
    pub content_type: HeaderValue,
    pub body:         UploadBody,
}

/// 下流サービスのレスポンス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status:       StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body:         Bytes,
}

/// ゲートウェイクライアントトレイト
///
/// テスト時にスタブを使用できるようトレイトで定義。
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// バッファ済みのリクエストを転送する
    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, GatewayError>;

    /// ボディをストリーミングで転送する
    async fn upload(&self, request: UploadRequest) -> Result<UpstreamResponse, GatewayError>;
}

/// ゲートウェイクライアント実装
pub struct GatewayClientImpl {
    client:         reqwest::Client,
    timeout:        Duration,
    upload_timeout: Duration,
}

impl GatewayClientImpl {
    /// 新しい GatewayClient を作成する
    ///
    /// # 引数
    ///
    /// - `timeout`: 通常リクエストのタイムアウト
    /// - `upload_timeout`: アップロードのタイムアウト
    pub fn new(timeout: Duration, upload_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()?,
            timeout,
            upload_timeout,
        })
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        bearer: Option<&str>,
        headers: HeaderMap,
        content_type: Option<HeaderValue>,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        inject_request_id(builder)
    }

    async fn into_upstream(response: reqwest::Response) -> Result<UpstreamResponse, GatewayError> {
        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await?;
        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl GatewayClient for GatewayClientImpl {
    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, GatewayError> {
        let mut builder = self
            .request(
                request.method,
                &request.url,
                request.bearer.as_deref(),
                request.headers,
                request.content_type,
            )
            .timeout(self.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        Self::into_upstream(response).await
    }

    async fn upload(&self, request: UploadRequest) -> Result<UpstreamResponse, GatewayError> {
        let response = self
            .request(
                Method::POST,
                &request.url,
                Some(&request.bearer),
                request.headers,
                Some(request.content_type),
            )
            .timeout(self.upload_timeout)
            .body(reqwest::Body::wrap_stream(request.body))
            .send()
            .await?;

        Self::into_upstream(response).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;
    use wiremock::{
        Mock,
        MockServer,
        ResponseTemplate,
        matchers::{body_string, header as header_eq, method, path, query_param},
    };

    use super::*;

    fn client() -> GatewayClientImpl {
        GatewayClientImpl::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap()
    }

    fn get_request(url: String) -> ForwardRequest {
        ForwardRequest {
            method: Method::GET,
            url,
            bearer: Some("at-1".to_string()),
            headers: HeaderMap::new(),
            content_type: None,
            body: None,
        }
    }

    #[tokio::test]
    async fn test_forward_でbearerトークンとクエリを転送する() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/cart/items"))
            .and(query_param("page", "2"))
            .and(header_eq("authorization", "Bearer at-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"items":[]}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = client()
            .forward(get_request(format!(
                "{}/services/cart/items?page=2",
                server.uri()
            )))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(br#"{"items":[]}"#));
        assert_eq!(
            response.content_type,
            Some(HeaderValue::from_static("application/json"))
        );
    }

    #[tokio::test]
    async fn test_forward_で下流のエラーステータスをそのまま返す() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/order"))
            .and(body_string(r#"{"qty":1}"#))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid"))
            .mount(&server)
            .await;
        let request = ForwardRequest {
            method:       Method::POST,
            url:          format!("{}/services/order", server.uri()),
            bearer:       Some("at-1".to_string()),
            headers:      HeaderMap::new(),
            content_type: Some(HeaderValue::from_static("application/json")),
            body:         Some(Bytes::from_static(br#"{"qty":1}"#)),
        };

        let response = client().forward(request).await.unwrap();

        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.body, Bytes::from_static(b"invalid"));
    }

    #[tokio::test]
    async fn test_forward_タイムアウトでtimeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;
        let sut = GatewayClientImpl::new(Duration::from_millis(50), Duration::from_secs(5)).unwrap();

        let result = sut.forward(get_request(format!("{}/slow", server.uri()))).await;

        assert!(matches!(result, Err(GatewayError::Timeout)));
    }

    #[tokio::test]
    async fn test_upload_でストリームのボディを転送する() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/GoogleCloudImageUpload/upload"))
            .and(query_param("folder", "products"))
            .and(header_eq("authorization", "Bearer at-1"))
            .and(body_string("part-1part-2"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&server)
            .await;

        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"part-1"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"part-2"))).await.unwrap();
        drop(tx);

        let response = client()
            .upload(UploadRequest {
                url:          format!("{}/api/GoogleCloudImageUpload/upload?folder=products", server.uri()),
                bearer:       "at-1".to_string(),
                headers:      HeaderMap::new(),
                content_type: HeaderValue::from_static("multipart/form-data; boundary=x"),
                body:         ReceiverStream::new(rx),
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
    }

    #[test]
    fn test_forward_requestのdebugでトークンをマスクする() {
        let request = get_request("http://gateway/services/cart".to_string());

        assert!(!format!("{request:?}").contains("at-1"));
    }
}
