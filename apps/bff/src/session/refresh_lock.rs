//! # セッション単位のリフレッシュロック
//!
//! 同じセッションに対するリフレッシュを 1 本に直列化する。
//! ワンタイムのリフレッシュトークンを 2 つのリクエストが同時に使うと、
//! 後から使った側がプロバイダに拒否されてセッションを失うため。
//!
//! ロックは使用中のセッションの分だけマップに保持し、最後の利用者が抜けたら取り除く。

use std::{collections::HashMap, future::Future, sync::Arc};

use parking_lot::Mutex;

/// セッション ID ごとの非同期ロック表
#[derive(Default)]
pub struct RefreshLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RefreshLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `key` のロックを保持した状態で `f` を実行する
    ///
    /// 呼び出し側の Future が途中で破棄されても、エントリは後始末される。
    pub async fn run_exclusive<F, T>(&self, key: &str, f: F) -> T
    where
        F: Future<Output = T>,
    {
        let entry = LockEntry::acquire(self, key);
        let _guard = entry.lock.lock().await;
        f.await
    }

    /// 保持しているロックの数
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ロック表のエントリへの参照
///
/// 破棄時に、他に利用者がいなければ表からエントリを取り除く。
struct LockEntry<'a> {
    locks: &'a RefreshLocks,
    key:   &'a str,
    lock:  Arc<tokio::sync::Mutex<()>>,
}

impl<'a> LockEntry<'a> {
    fn acquire(locks: &'a RefreshLocks, key: &'a str) -> Self {
        let lock = locks
            .locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();
        Self { locks, key, lock }
    }
}

impl Drop for LockEntry<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock();
        // 参照が表とこのエントリだけなら最後の利用者
        let last = locks
            .get(self.key)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if last {
            locks.remove(self.key);
        }
    }
}
