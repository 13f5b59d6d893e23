//! # 戻り先 URL
//!
//! ログイン後のリダイレクト先を検証し、オープンリダイレクトを防ぐ。
//!
//! | 入力 | 結果 |
//! |------|------|
//! | 未指定・空白 | `/` |
//! | `/cart` のような同一オリジンの相対パス | そのまま |
//! | `//evil.example.com`、`/\evil.example.com` | `/` |
//! | 許可リストのホストを持つ `http(s)` の絶対 URL | そのまま |
//! | それ以外 | `/` |

use url::Url;

/// 検証に失敗した場合の戻り先
pub const DEFAULT_RETURN_URL: &str = "/";

/// 検証済みの戻り先 URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnUrl(String);

impl ReturnUrl {
    /// 許可リストに照らして戻り先を検証する
    ///
    /// `allowed_hosts` は `host` または `host:port` 形式（大文字小文字は区別しない）。
    pub fn sanitize(raw: Option<&str>, allowed_hosts: &[String]) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };

        if raw.chars().any(|c| c.is_control() || c == '\\') {
            return Self::default();
        }

        if raw.starts_with('/') {
            if raw.starts_with("//") {
                return Self::default();
            }
            return Self(raw.to_string());
        }

        match Url::parse(raw) {
            Ok(url) if is_allowed_absolute(&url, allowed_hosts) => Self(raw.to_string()),
            _ => Self::default(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 同一オリジンの相対パスかどうか
    pub fn is_relative(&self) -> bool {
        self.0.starts_with('/')
    }

    /// リダイレクト先の完全な URL を組み立てる
    ///
    /// 相対パスはフロントエンドのベース URL に連結し、絶対 URL はそのまま使う。
    pub fn resolve_against(&self, base_url: &str) -> String {
        if self.is_relative() {
            format!("{}{}", base_url.trim_end_matches('/'), self.0)
        } else {
            self.0.clone()
        }
    }
}

impl Default for ReturnUrl {
    fn default() -> Self {
        Self(DEFAULT_RETURN_URL.to_string())
    }
}

fn is_allowed_absolute(url: &Url, allowed_hosts: &[String]) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    if !url.username().is_empty() || url.password().is_some() {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    allowed_hosts
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&authority))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn allowed() -> Vec<String> {
        vec!["shop.example.com".to_string(), "localhost:3000".to_string()]
    }

    #[rstest]
    #[case::カート("/cart", "/cart")]
    #[case::クエリ付き("/orders?page=2#top", "/orders?page=2#top")]
    #[case::許可ホスト("https://shop.example.com/account", "https://shop.example.com/account")]
    #[case::許可ホストとポート("http://localhost:3000/cart", "http://localhost:3000/cart")]
    #[case::大文字ホスト("https://SHOP.example.com/", "https://SHOP.example.com/")]
    fn test_sanitize_は安全な戻り先をそのまま通す(#[case] raw: &str, #[case] expected: &str) {
        let sut = ReturnUrl::sanitize(Some(raw), &allowed());

        assert_eq!(sut.as_str(), expected);
    }

    #[rstest]
    #[case::外部ホスト("https://evil.example.com")]
    #[case::プロトコル相対("//evil.example.com/cart")]
    #[case::バックスラッシュ("/\\evil.example.com")]
    #[case::javascriptスキーム("javascript:alert(1)")]
    #[case::ユーザー情報付き("https://shop.example.com@evil.example.com/")]
    #[case::許可されていないポート("http://localhost:4000/")]
    #[case::スキームなしホスト("evil.example.com/cart")]
    #[case::改行("/cart\r\nSet-Cookie: x=y")]
    fn test_sanitize_は危険な戻り先をデフォルトに書き換える(#[case] raw: &str) {
        let sut = ReturnUrl::sanitize(Some(raw), &allowed());

        assert_eq!(sut.as_str(), DEFAULT_RETURN_URL);
    }

    #[rstest]
    #[case::未指定(None)]
    #[case::空文字(Some(""))]
    #[case::空白(Some("   "))]
    fn test_sanitize_は未指定をデフォルトにする(#[case] raw: Option<&str>) {
        assert_eq!(ReturnUrl::sanitize(raw, &allowed()), ReturnUrl::default());
    }

    #[test]
    fn test_sanitize_は許可リストが空なら絶対urlをすべて拒否する() {
        let sut = ReturnUrl::sanitize(Some("https://shop.example.com/"), &[]);

        assert_eq!(sut.as_str(), DEFAULT_RETURN_URL);
    }

    #[test]
    fn test_resolve_against_は相対パスをベースurlに連結する() {
        let sut = ReturnUrl::sanitize(Some("/cart"), &allowed());

        assert_eq!(
            sut.resolve_against("https://shop.example.com/"),
            "https://shop.example.com/cart"
        );
    }

    #[test]
    fn test_resolve_against_は絶対urlをそのまま返す() {
        let sut = ReturnUrl::sanitize(Some("http://localhost:3000/cart"), &allowed());

        assert_eq!(
            sut.resolve_against("https://shop.example.com"),
            "http://localhost:3000/cart"
        );
    }
}
