//! # プロキシルーティングテーブル
//!
//! `/api/{domain}/{*path}` の `domain` をゲートウェイ上のパスプレフィックスに対応付ける。
//! 文字列パターンによる振り分けではなく静的テーブルとして持ち、単体でテストできるようにする。

use crate::DomainError;

/// ルーティングテーブルの 1 エントリ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyRoute {
    /// `/api/{domain}/...` の `domain` 部分
    pub domain:          &'static str,
    /// ゲートウェイ上のパスプレフィックス
    pub upstream_prefix: &'static str,
    /// セッション（Bearer トークン）が必要か
    pub requires_auth:   bool,
    /// 許可する HTTP メソッド
    pub methods:         &'static [&'static str],
}

/// ドメイン → ゲートウェイのルーティングテーブル
pub static ROUTES: &[ProxyRoute] = &[
    ProxyRoute {
        domain:          "product",
        upstream_prefix: "/services/catalog",
        requires_auth:   false,
        methods:         &["GET"],
    },
    ProxyRoute {
        domain:          "cart",
        upstream_prefix: "/services/cart",
        requires_auth:   true,
        methods:         &["GET", "POST", "PUT", "DELETE"],
    },
    ProxyRoute {
        domain:          "order",
        upstream_prefix: "/services/order",
        requires_auth:   true,
        methods:         &["GET", "POST", "PUT"],
    },
    ProxyRoute {
        domain:          "discount",
        upstream_prefix: "/services/discount",
        requires_auth:   true,
        methods:         &["GET", "POST"],
    },
    ProxyRoute {
        domain:          "cargo",
        upstream_prefix: "/services/cargo",
        requires_auth:   true,
        methods:         &["GET", "POST"],
    },
    ProxyRoute {
        domain:          "auth",
        upstream_prefix: "/auth",
        requires_auth:   false,
        methods:         &["GET"],
    },
];

/// ドメイン名からルートを引く
pub fn find_route(domain: &str) -> Option<&'static ProxyRoute> {
    ROUTES.iter().find(|route| route.domain == domain)
}

impl ProxyRoute {
    /// メソッドが許可されているか
    pub fn allows(&self, method: &str) -> bool {
        self.methods.contains(&method)
    }

    /// ゲートウェイ上のパスを組み立てる
    ///
    /// `.` / `..` セグメントを含むパスはプレフィックスの外に出られるため拒否する。
    pub fn upstream_path(&self, path: &str) -> Result<String, DomainError> {
        let path = path.trim_start_matches('/');
        if path.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(DomainError::Validation(
                "パスに相対セグメントを含めることはできません".to_string(),
            ));
        }
        if path.is_empty() {
            return Ok(self.upstream_prefix.to_string());
        }
        Ok(format!("{}/{}", self.upstream_prefix, path))
    }
}
