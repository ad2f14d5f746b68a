//! コマンド層 - GUIとのインターフェース
//!
//! GUIは本モジュールのコマンドだけを呼び出し、成功ペイロードまたは
//! 人間が読めるエラーメッセージ（String）を受け取る。時間のかかる
//! ファイル操作はブロッキングタスクに逃がし、呼び出しスレッドを塞がない。
//! 同時実行の抑止はGUI側の責務（操作中はボタンを無効化する）。

use crate::backup::{format_size, BackupRepository};
use crate::config::ConfigStore;
use crate::process;
use crate::restore::{ClaudeProcessControl, RestoreOrchestrator, RestoreOutcome, RestorePrompt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// ラベル未指定時の既定値
const DEFAULT_LABEL: &str = "claude";

/// アプリケーション状態
pub struct AppState {
    /// 設定ストア（全コマンドで共有）
    pub store: ConfigStore,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            store: ConfigStore::new(),
        }
    }

    pub fn with_store(store: ConfigStore) -> Self {
        Self { store }
    }

    fn repository(&self) -> BackupRepository {
        BackupRepository::from_config(&self.store.load())
    }
}

/// バックアップ作成リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateBackupRequest {
    pub label: String,
}

/// バックアップ作成レスポンス
#[derive(Debug, Serialize)]
pub struct CreateBackupResponse {
    pub name: String,
}

/// 一覧の1行分（表示用に整形済み）
#[derive(Debug, Serialize)]
pub struct BackupListItem {
    pub name: String,
    pub created_at: String,
    pub size: String,
    pub size_bytes: u64,
    pub is_current: bool,
}

/// バックアップ一覧レスポンス
#[derive(Debug, Serialize)]
pub struct ListBackupsResponse {
    pub backups: Vec<BackupListItem>,
}

/// バックアップ削除リクエスト
#[derive(Debug, Deserialize)]
pub struct DeleteBackupRequest {
    pub name: String,
}

/// 復元リクエスト
#[derive(Debug, Deserialize)]
pub struct RestoreBackupRequest {
    pub name: String,
}

/// 復元レスポンス（restored=falseはユーザー中止）
#[derive(Debug, Serialize)]
pub struct RestoreBackupResponse {
    pub restored: bool,
    pub terminated: usize,
    pub relaunched: bool,
}

/// Claude稼働状態レスポンス（GUIの定期ポーリング用）
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
}

/// 設定レスポンス
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub source_dir: String,
    pub backup_dir: String,
    pub claude_path: String,
    pub current_backup: String,
}

/// ラベルの検証。空なら既定値、使用可能文字は英数字と `-` `_` のみ。
fn validate_label(label: &str) -> Result<String, String> {
    let label = label.trim();
    if label.is_empty() {
        return Ok(DEFAULT_LABEL.to_string());
    }
    if label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(label.to_string())
    } else {
        Err("ラベルには英数字とハイフン、アンダースコアのみ使用できます".to_string())
    }
}

fn ok_or_save_error(saved: bool) -> Result<(), String> {
    if saved {
        Ok(())
    } else {
        Err("設定の保存に失敗しました".to_string())
    }
}

/// バックアップを作成する
pub async fn create_backup(
    request: CreateBackupRequest,
    state: &AppState,
) -> Result<CreateBackupResponse, String> {
    let label = validate_label(&request.label)?;
    let repo = state.repository();

    let name = tokio::task::spawn_blocking(move || repo.create(&label))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

    Ok(CreateBackupResponse { name })
}

/// バックアップの一覧を取得する（新しい順）
pub async fn list_backups(state: &AppState) -> Result<ListBackupsResponse, String> {
    let repo = state.repository();
    let current = state.store.get_current_backup();

    let entries = tokio::task::spawn_blocking(move || repo.list())
        .await
        .map_err(|e| e.to_string())?;

    let backups = entries
        .into_iter()
        .map(|entry| BackupListItem {
            created_at: entry.created_at.format("%Y-%m-%d %H:%M").to_string(),
            size: format_size(entry.size_bytes),
            size_bytes: entry.size_bytes,
            is_current: !current.is_empty() && entry.name == current,
            name: entry.name,
        })
        .collect();

    Ok(ListBackupsResponse { backups })
}

/// バックアップを削除する
pub async fn delete_backup(request: DeleteBackupRequest, state: &AppState) -> Result<(), String> {
    let repo = state.repository();

    tokio::task::spawn_blocking(move || repo.delete(&request.name))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

/// スナップショットへ復元する
///
/// 確認プロンプトへの応答はGUIが `confirm` 経由で返す。
pub async fn restore_backup(
    request: RestoreBackupRequest,
    state: &AppState,
    confirm: Arc<dyn Fn(&RestorePrompt) -> bool + Send + Sync>,
) -> Result<RestoreBackupResponse, String> {
    let store = state.store.clone();
    let claude_path = store.get_claude_path();

    let outcome = tokio::task::spawn_blocking(move || {
        let control = ClaudeProcessControl::new(claude_path);
        let orchestrator =
            RestoreOrchestrator::new(store, control, move |prompt| confirm(prompt));
        orchestrator.execute(&request.name)
    })
    .await
    .map_err(|e| e.to_string())?
    .map_err(|e| e.to_string())?;

    Ok(match outcome {
        RestoreOutcome::Completed {
            terminated,
            relaunched,
        } => RestoreBackupResponse {
            restored: true,
            terminated,
            relaunched,
        },
        RestoreOutcome::Aborted => RestoreBackupResponse {
            restored: false,
            terminated: 0,
            relaunched: false,
        },
    })
}

/// Claudeの稼働状態を返す（呼び出しごとに列挙し直す）
pub fn claude_status() -> StatusResponse {
    StatusResponse {
        running: process::is_claude_running(),
    }
}

/// 現在の設定を返す
pub fn get_config(state: &AppState) -> ConfigResponse {
    let config = state.store.load();
    ConfigResponse {
        source_dir: config.source_dir,
        backup_dir: config.backup_dir,
        claude_path: config.claude_path,
        current_backup: config.current_backup,
    }
}

pub fn set_source_dir(state: &AppState, path: &str) -> Result<(), String> {
    ok_or_save_error(state.store.set_source_dir(path))
}

pub fn set_backup_dir(state: &AppState, path: &str) -> Result<(), String> {
    ok_or_save_error(state.store.set_backup_dir(path))
}

pub fn set_claude_path(state: &AppState, path: &str) -> Result<(), String> {
    ok_or_save_error(state.store.set_claude_path(path))
}
