//! # セッション Cookie
//!
//! ブラウザに渡す Cookie の組み立てと読み取りを担当する。
//!
//! | Cookie | 値 | 有効期間 | Path |
//! |--------|-----|---------|------|
//! | `bff_session` | セッション ID のみ | 30日 | `/` |
//! | `pkce_verifier` | コードベリファイア | 10分 | フロー Cookie パス |
//! | `oauth_state` | state | 10分 | フロー Cookie パス |
//! | `return_url` | 検証済みの戻り先 | 10分 | フロー Cookie パス |
//!
//! すべて HttpOnly・SameSite=Lax。トークン自体は Cookie に載せない。

use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use storefront_domain::session_id::SessionId;
use storefront_infra::SESSION_TTL_SECONDS;

/// セッション Cookie 名
pub const SESSION_COOKIE_NAME: &str = "bff_session";
/// PKCE コードベリファイアの Cookie 名
pub const PKCE_VERIFIER_COOKIE: &str = "pkce_verifier";
/// OAuth state の Cookie 名
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";
/// 戻り先 URL の Cookie 名
pub const RETURN_URL_COOKIE: &str = "return_url";

/// PKCE フロー Cookie の有効期間（秒）
pub const FLOW_COOKIE_MAX_AGE: i64 = 10 * 60;

/// Cookie 属性の設定
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Secure 属性を付与するか（本番環境）
    pub secure:    bool,
    /// PKCE フロー Cookie の Path
    pub flow_path: String,
}

impl CookieSettings {
    /// セッション Cookie を構築する
    pub fn session_cookie(&self, session_id: &SessionId) -> Cookie<'static> {
        self.build(
            SESSION_COOKIE_NAME,
            session_id.as_str().to_string(),
            "/".to_string(),
            SESSION_TTL_SECONDS as i64,
        )
    }

    /// セッション Cookie をクリアするための Cookie を構築する
    pub fn clear_session_cookie(&self) -> Cookie<'static> {
        self.build(SESSION_COOKIE_NAME, String::new(), "/".to_string(), 0)
    }

    /// PKCE フロー Cookie を構築する
    pub fn flow_cookie(&self, name: &'static str, value: impl Into<String>) -> Cookie<'static> {
        self.build(name, value.into(), self.flow_path.clone(), FLOW_COOKIE_MAX_AGE)
    }

    /// PKCE フロー Cookie をクリアするための Cookie を構築する
    pub fn clear_flow_cookie(&self, name: &'static str) -> Cookie<'static> {
        self.build(name, String::new(), self.flow_path.clone(), 0)
    }

    /// 3 つのフロー Cookie をすべてクリアする
    pub fn clear_flow_cookies(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.clear_flow_cookie(PKCE_VERIFIER_COOKIE))
            .add(self.clear_flow_cookie(OAUTH_STATE_COOKIE))
            .add(self.clear_flow_cookie(RETURN_URL_COOKIE))
    }

    fn build(
        &self,
        name: &'static str,
        value: String,
        path: String,
        max_age_secs: i64,
    ) -> Cookie<'static> {
        let mut builder = Cookie::build((name, value))
            .path(path)
            .max_age(time::Duration::seconds(max_age_secs))
            .http_only(true)
            .same_site(SameSite::Lax);

        if self.secure {
            builder = builder.secure(true);
        }

        builder.build()
    }
}

/// セッション Cookie からセッション ID を読み取る
///
/// Cookie がない・空・形式不正の場合は `None`。
pub fn session_id(jar: &CookieJar) -> Option<SessionId> {
    jar.get(SESSION_COOKIE_NAME)
        .map(Cookie::value)
        .filter(|v| !v.is_empty())
        .and_then(|v| SessionId::parse(v).ok())
}

/// フロー Cookie の値を読み取る（空は未設定扱い）
pub fn flow_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(Cookie::value)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
