//! # ヘルスチェックハンドラ
//!
//! BFF の稼働状態を確認するためのエンドポイント。
//!
//! - `/health` - Liveness Check（常に `"healthy"` を返す）
//! - `/health/ready` - Readiness Check（トークンストアの Redis と内部ゲートウェイへの到達性）

use std::{sync::Arc, time::Duration};

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use redis::aio::ConnectionManager;
use serde::Serialize;

/// 個別チェックのタイムアウト
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// `/health` のレスポンス
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status:  &'static str,
    /// Cargo.toml のバージョン
    pub version: &'static str,
}

/// 個別チェックの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Error,
}

/// Readiness 全体のステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    NotReady,
}

/// BFF が依存するサービスごとのチェック結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DependencyChecks {
    /// トークンストア
    pub redis:   CheckStatus,
    /// 内部ゲートウェイ
    pub gateway: CheckStatus,
}

impl DependencyChecks {
    fn all_ok(&self) -> bool {
        self.redis == CheckStatus::Ok && self.gateway == CheckStatus::Ok
    }
}

/// `/health/ready` のレスポンス
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: ReadinessStatus,
    pub checks: DependencyChecks,
}

/// BFF のヘルスチェックエンドポイント
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status:  "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness Check 用の State
pub struct ReadinessState {
    pub redis_conn:  ConnectionManager,
    pub gateway_url: String,
    pub http_client: reqwest::Client,
}

/// BFF の Readiness Check エンドポイント
///
/// Redis と内部ゲートウェイを並行チェックする。
/// 全チェック OK → 200、1 つでも失敗 → 503。
#[tracing::instrument(skip_all)]
pub async fn readiness_check(State(state): State<Arc<ReadinessState>>) -> impl IntoResponse {
    let (redis, gateway) = tokio::join!(
        check_redis(state.redis_conn.clone()),
        check_gateway(&state.http_client, &state.gateway_url),
    );

    readiness_response(DependencyChecks { redis, gateway })
}

fn readiness_response(checks: DependencyChecks) -> (StatusCode, Json<ReadinessResponse>) {
    let (status, http_status) = if checks.all_ok() {
        (ReadinessStatus::Ready, StatusCode::OK)
    } else {
        (ReadinessStatus::NotReady, StatusCode::SERVICE_UNAVAILABLE)
    };

    (http_status, Json(ReadinessResponse { status, checks }))
}

/// Redis への接続を PING で確認する
async fn check_redis(mut conn: ConnectionManager) -> CheckStatus {
    match tokio::time::timeout(
        CHECK_TIMEOUT,
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    {
        Ok(Ok(_)) => CheckStatus::Ok,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "readiness check: redis ping failed");
            CheckStatus::Error
        }
        Err(_) => {
            tracing::warn!("readiness check: redis check timed out");
            CheckStatus::Error
        }
    }
}

/// 内部ゲートウェイに到達できるかを確認する
///
/// ゲートウェイ自身のルーティング結果には関知しないため、5xx 以外の応答が
/// 返れば到達可能とみなす。
async fn check_gateway(client: &reqwest::Client, base_url: &str) -> CheckStatus {
    match tokio::time::timeout(CHECK_TIMEOUT, client.get(base_url).send()).await {
        Ok(Ok(response)) if !response.status().is_server_error() => CheckStatus::Ok,
        Ok(Ok(response)) => {
            tracing::warn!(
                status = response.status().as_u16(),
                "readiness check: gateway returned server error"
            );
            CheckStatus::Error
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "readiness check: gateway request failed");
            CheckStatus::Error
        }
        Err(_) => {
            tracing::warn!("readiness check: gateway check timed out");
            CheckStatus::Error
        }
    }
}
