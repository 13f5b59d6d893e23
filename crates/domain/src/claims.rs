//! # ユーザークレーム
//!
//! ID トークン（なければアクセストークン）のペイロードからユーザー情報を取り出す。
//!
//! トークンは ID プロバイダから TLS 越しに直接受け取ったもので、ブラウザを経由しない。
//! 署名検証は行わず、ペイロード部（2 番目のセグメント）を base64url デコードするだけ。

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{DomainError, token::TokenSet};

/// フロントエンドに返すユーザー情報の要約
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserClaims {
    pub sub:            Option<String>,
    pub name:           Option<String>,
    pub username:       Option<String>,
    pub email:          Option<String>,
    pub email_verified: bool,
    pub roles:          Vec<String>,
    pub given_name:     Option<String>,
    pub family_name:    Option<String>,
}

impl UserClaims {
    /// JWT 文字列のペイロードをデコードする
    pub fn decode(jwt: &str) -> Result<Self, DomainError> {
        let mut segments = jwt.split('.');
        let payload = match (segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_)) if !payload.is_empty() => payload,
            _ => {
                return Err(DomainError::InvalidToken(
                    "JWT のセグメント数が不正です".to_string(),
                ));
            }
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| DomainError::InvalidToken(format!("base64url デコード失敗: {e}")))?;
        let claims: Map<String, Value> = serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::InvalidToken(format!("JSON デコード失敗: {e}")))?;

        Ok(Self::from_map(&claims))
    }

    /// トークンセットからクレームを取り出す
    ///
    /// ID トークンを優先し、なければアクセストークン（JWT 形式の場合）を使う。
    pub fn from_tokens(tokens: &TokenSet) -> Result<Self, DomainError> {
        match tokens.id_token() {
            Some(id_token) if !id_token.is_empty() => Self::decode(id_token),
            _ => Self::decode(tokens.access_token()),
        }
    }

    fn from_map(claims: &Map<String, Value>) -> Self {
        Self {
            sub:            string_claim(claims, "sub"),
            name:           string_claim(claims, "name"),
            username:       string_claim(claims, "username")
                .or_else(|| string_claim(claims, "preferred_username")),
            email:          string_claim(claims, "email"),
            email_verified: bool_claim(claims, "email_verified"),
            roles:          roles_claim(claims),
            given_name:     string_claim(claims, "given_name"),
            family_name:    string_claim(claims, "family_name"),
        }
    }
}

fn string_claim(claims: &Map<String, Value>, key: &str) -> Option<String> {
    match claims.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `true` / `"true"` のどちらの表現も受け付ける
fn bool_claim(claims: &Map<String, Value>, key: &str) -> bool {
    match claims.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// `role` / `roles` クレームを集める（単一文字列・配列の両方に対応）
fn roles_claim(claims: &Map<String, Value>) -> Vec<String> {
    let mut roles = Vec::new();
    for key in ["role", "roles"] {
        match claims.get(key) {
            Some(Value::String(s)) => roles.push(s.clone()),
            Some(Value::Array(items)) => roles.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            ),
            _ => {}
        }
    }
    roles.dedup();
    roles
}
