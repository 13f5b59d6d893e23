//! # ビジネスイベントログとエラーコンテキストの構造化ヘルパー
//!
//! `jq` で認証イベントを追跡できるよう、ログフィールドの命名規約と
//! ヘルパーマクロを提供する。
//!
//! ## ビジネスイベント
//!
//! [`log_business_event!`] マクロで出力する。`event.kind = "business_event"` マーカーが
//! 自動付与され、`jq 'select(.["event.kind"] == "business_event")'` でフィルタできる。
//!
//! ## エラーコンテキスト
//!
//! `tracing::error!` / `tracing::warn!` に `error.category` + `error.kind` フィールドを
//! 直接追加する。定数は [`error`] モジュールで提供。
//!
//! ## トークンを記録しない
//!
//! イベントに含めてよいのはセッション ID の先頭数文字と結果のみ。
//! アクセストークン・リフレッシュトークンはどのフィールドにも入れない。

/// ビジネスイベントを構造化ログとして出力する。
///
/// `event.kind = "business_event"` マーカーを自動付与し、
/// `tracing::info!` レベルで出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: イベントカテゴリ（[`event::category`] の定数を使用）
/// - `event.action`: アクション名（[`event::action`] の定数を使用）
/// - `event.result`: 結果（[`event::result`] の定数を使用）
///
/// ## 推奨フィールド
///
/// - `event.entity_type`: エンティティ種別（[`event::entity_type`] の定数を使用）
/// - `event.entity_id`: エンティティ ID（セッションは短縮形）
/// - `event.reason`: 失敗理由
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const AUTH: &str = "auth";
        pub const PROXY: &str = "proxy";
        pub const ACCOUNT: &str = "account";
    }

    /// イベントアクション
    pub mod action {
        pub const LOGIN_SUCCESS: &str = "auth.login_success";
        pub const LOGIN_FAILURE: &str = "auth.login_failure";
        pub const LOGOUT: &str = "auth.logout";
        pub const REGISTERED: &str = "auth.registered";
        pub const TOKEN_REFRESHED: &str = "auth.token_refreshed";
        pub const REFRESH_FAILED: &str = "auth.refresh_failed";
        pub const SESSION_REVOKED: &str = "auth.session_revoked";
        pub const CALLBACK_REJECTED: &str = "auth.callback_rejected";
        pub const UPLOAD_FORWARDED: &str = "proxy.upload_forwarded";
        pub const PROFILE_UPDATED: &str = "account.profile_updated";
        pub const PASSWORD_CHANGED: &str = "account.password_changed";
        pub const ADDRESS_CHANGED: &str = "account.address_changed";
    }

    /// エンティティ種別
    pub mod entity_type {
        pub const USER: &str = "user";
        pub const SESSION: &str = "session";
        pub const IMAGE: &str = "image";
        pub const ADDRESS: &str = "address";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// インフラストラクチャ（Redis、トークンストア）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部サービス呼び出し（ID プロバイダ、ゲートウェイ、画像サービス）
        pub const EXTERNAL_SERVICE: &str = "external_service";
    }

    /// エラー種別
    pub mod kind {
        pub const SESSION: &str = "session";
        pub const INTERNAL: &str = "internal";
        pub const TOKEN_EXCHANGE: &str = "token_exchange";
        pub const TOKEN_REFRESH: &str = "token_refresh";
        pub const REGISTRATION: &str = "registration";
        pub const SERVICE_COMMUNICATION: &str = "service_communication";
    }
}
