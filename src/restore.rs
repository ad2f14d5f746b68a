//! 復元オーケストレーター - プロセス停止を挟んだ安全な復元プロトコル
//!
//! 1回の復元は 確認 → 停止 → コピー → 設定更新 → 再起動確認 の順で進む。
//! Claudeが実行中のまま復元するとファイルハンドルと競合するため、
//! コピー前に必ず停止プロトコルを完了させる。

use crate::backup::copy_dir_recursive;
use crate::config::{AppConfig, ConfigStore};
use crate::process;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// 復元エラー
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("バックアップが見つかりません: {0}")]
    NotFound(String),

    #[error("復元中のIOエラー（{phase}）: {source}")]
    Io {
        phase: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// 復元の進行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    /// 待機中
    Idle,
    /// ユーザー確認中
    Confirming,
    /// Claude停止中
    Terminating,
    /// スナップショットのコピー中
    Copying,
    /// 設定更新中
    Updating,
    /// 再起動の確認中
    Relaunching,
    /// 完了
    Done,
    /// ユーザーが中止（副作用なし）
    Aborted,
    /// エラーで終了
    Failed,
}

/// 確認ポイントで呼び出し側に提示するプロンプト
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestorePrompt {
    /// Claude実行中: 「閉じて続行するか」
    CloseAndContinue { name: String },
    /// Claude停止中: 「現在のデータを置き換えるか」の警告
    ReplaceData { name: String },
    /// 復元完了後: 「Claudeを再起動するか」
    Relaunch,
}

/// 復元の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Completed { terminated: usize, relaunched: bool },
    Aborted,
}

/// プロセス制御の接合点。本番実装は `process` モジュールへ委譲し、
/// テストではモックで停止順序を検証する。
pub trait ProcessControl {
    fn is_running(&self) -> bool;
    fn terminate(&self, timeout: Duration) -> usize;
    fn launch(&self) -> bool;
}

/// 実プロセスを操作する本番実装
pub struct ClaudeProcessControl {
    claude_path: String,
}

impl ClaudeProcessControl {
    pub fn new(claude_path: impl Into<String>) -> Self {
        Self {
            claude_path: claude_path.into(),
        }
    }
}

impl ProcessControl for ClaudeProcessControl {
    fn is_running(&self) -> bool {
        process::is_claude_running()
    }

    fn terminate(&self, timeout: Duration) -> usize {
        process::terminate_claude(timeout)
    }

    fn launch(&self) -> bool {
        process::start_claude(&self.claude_path)
    }
}

/// 復元オーケストレーター
pub struct RestoreOrchestrator<P: ProcessControl> {
    store: ConfigStore,
    process: P,
    terminate_timeout: Duration,
    confirm: Box<dyn Fn(&RestorePrompt) -> bool + Send + Sync>,
    on_status: Option<Box<dyn Fn(RestoreStatus) + Send + Sync>>,
}

impl<P: ProcessControl> RestoreOrchestrator<P> {
    pub fn new<F>(store: ConfigStore, process: P, confirm: F) -> Self
    where
        F: Fn(&RestorePrompt) -> bool + Send + Sync + 'static,
    {
        Self {
            store,
            process,
            terminate_timeout: process::DEFAULT_TERMINATE_TIMEOUT,
            confirm: Box::new(confirm),
            on_status: None,
        }
    }

    /// 状態遷移コールバックを設定
    pub fn with_status_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(RestoreStatus) + Send + Sync + 'static,
    {
        self.on_status = Some(Box::new(callback));
        self
    }

    /// 停止待機のタイムアウトを変更
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    /// 指定スナップショットへの復元を実行する
    pub fn execute(&self, name: &str) -> Result<RestoreOutcome, RestoreError> {
        let config = self.store.load();

        self.set_status(RestoreStatus::Confirming);
        let was_running = self.process.is_running();
        let prompt = if was_running {
            RestorePrompt::CloseAndContinue {
                name: name.to_string(),
            }
        } else {
            RestorePrompt::ReplaceData {
                name: name.to_string(),
            }
        };
        if !(self.confirm)(&prompt) {
            info!("復元を中止: {name}");
            self.set_status(RestoreStatus::Aborted);
            return Ok(RestoreOutcome::Aborted);
        }

        let mut terminated = 0;
        if was_running {
            self.set_status(RestoreStatus::Terminating);
            terminated = self.process.terminate(self.terminate_timeout);
            if terminated == 0 {
                // 確認後に自然終了したケース。停止済みとして続行する。
                warn!("停止対象のClaudeプロセスが見つかりません");
            } else {
                info!("Claudeを停止（{terminated}プロセス）");
            }
        }

        self.set_status(RestoreStatus::Copying);
        if let Err(e) = self.replace_source(&config, name) {
            self.set_status(RestoreStatus::Failed);
            return Err(e);
        }

        self.set_status(RestoreStatus::Updating);
        if !self.store.set_current_backup(name) {
            // 表示用の状態のため、保存失敗で復元全体は失敗させない
            warn!("current_backupの保存に失敗");
        }

        self.set_status(RestoreStatus::Relaunching);
        let mut relaunched = false;
        if (self.confirm)(&RestorePrompt::Relaunch) {
            relaunched = self.process.launch();
            if !relaunched {
                warn!("Claudeの起動に失敗");
            }
        }

        self.set_status(RestoreStatus::Done);
        info!("復元が完了: {name}");
        Ok(RestoreOutcome::Completed {
            terminated,
            relaunched,
        })
    }

    /// ソースディレクトリをスナップショットの内容で置き換える
    ///
    /// 既存ツリーを削除してからコピーするため、途中で失敗すると
    /// ソースは空または部分的な状態のまま残る（自動復旧はしない）。
    fn replace_source(&self, config: &AppConfig, name: &str) -> Result<(), RestoreError> {
        let backup_path = Path::new(&config.backup_dir).join(name);
        if !backup_path.exists() {
            return Err(RestoreError::NotFound(name.to_string()));
        }

        let source_dir = Path::new(&config.source_dir);
        if source_dir.exists() {
            fs::remove_dir_all(source_dir).map_err(|e| RestoreError::Io {
                phase: "既存データの削除",
                source: e,
            })?;
        }
        if let Some(parent) = source_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| RestoreError::Io {
                phase: "復元先の作成",
                source: e,
            })?;
        }
        copy_dir_recursive(&backup_path, source_dir).map_err(|e| RestoreError::Io {
            phase: "スナップショットのコピー",
            source: e,
        })
    }

    fn set_status(&self, status: RestoreStatus) {
        if let Some(ref callback) = self.on_status {
            callback(status);
        }
    }
}
