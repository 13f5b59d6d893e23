//! # Canonical Log Line ミドルウェア
//!
//! BFF へのリクエスト 1 件ごとに、完了時のサマリを 1 行で出力する tower Layer。
//!
//! 経路の種別（`bff.route`）とプロキシ先のドメイン（`bff.domain`）を付けるため、
//! 「どのドメインへの転送が 503/504 を返しているか」を 1 行のログだけで集計できる。
//! TraceLayer のスパン内に配置し、request_id はスパンから JSON ログに入る。
//!
//! ヘルスチェック（`/health*`）は出力しない。

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use http::{Request, Response, StatusCode};
use tower::{Layer, Service};

/// パスから判別した BFF の経路
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteGroup<'a> {
    Health,
    Auth,
    /// `/api/{domain}/...`
    Proxy(&'a str),
    Image,
    Account,
    Other,
}

impl RouteGroup<'_> {
    fn classify(path: &str) -> RouteGroup<'_> {
        let mut segments = path.trim_start_matches('/').split('/');
        match segments.next().unwrap_or_default() {
            "health" => RouteGroup::Health,
            "auth" => RouteGroup::Auth,
            "api" => match segments.next() {
                Some(domain) if !domain.is_empty() => RouteGroup::Proxy(domain),
                _ => RouteGroup::Other,
            },
            "images" => RouteGroup::Image,
            "users" | "addresses" => RouteGroup::Account,
            _ => RouteGroup::Other,
        }
    }

    fn name(self) -> &'static str {
        match self {
            RouteGroup::Health => "health",
            RouteGroup::Auth => "auth",
            RouteGroup::Proxy(_) => "proxy",
            RouteGroup::Image => "image",
            RouteGroup::Account => "account",
            RouteGroup::Other => "other",
        }
    }

    fn domain(self) -> Option<String> {
        match self {
            RouteGroup::Proxy(domain) => Some(domain.to_string()),
            _ => None,
        }
    }
}

/// ステータスの大分類（`2xx` / `4xx` / `5xx` 等）
fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() / 100 {
        1 => "1xx",
        2 => "2xx",
        3 => "3xx",
        4 => "4xx",
        _ => "5xx",
    }
}

/// Canonical Log Line を出力する Layer
///
/// ```text
/// SetRequestIdLayer → TraceLayer → CanonicalLogLineLayer → ... → handler
/// ```
#[derive(Clone, Debug)]
pub struct CanonicalLogLineLayer;

impl<S> Layer<S> for CanonicalLogLineLayer {
    type Service = CanonicalLogLineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CanonicalLogLineService { inner }
    }
}

#[derive(Clone, Debug)]
pub struct CanonicalLogLineService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CanonicalLogLineService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;
    type Response = S::Response;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // poll_ready 済みの inner を取り出し、クローンと入れ替える
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let group = RouteGroup::classify(req.uri().path());
        if group == RouteGroup::Health {
            return Box::pin(inner.call(req));
        }

        let route = group.name();
        let domain = group.domain();
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let start = Instant::now();

        Box::pin(async move {
            let result = inner.call(req).await;
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &result {
                Ok(response) => tracing::info!(
                    log.r#type = "canonical",
                    bff.route = route,
                    bff.domain = domain.as_deref(),
                    http.method = %method,
                    http.path = %path,
                    http.status_code = response.status().as_u16(),
                    http.status_class = status_class(response.status()),
                    http.latency_ms = latency_ms,
                    "リクエスト完了"
                ),
                Err(err) => tracing::error!(
                    log.r#type = "canonical",
                    bff.route = route,
                    bff.domain = domain.as_deref(),
                    http.method = %method,
                    http.path = %path,
                    http.latency_ms = latency_ms,
                    error.message = %err,
                    "リクエスト処理エラー"
                ),
            }

            result
        })
    }
}
