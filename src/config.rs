//! 設定ストア - パス設定とカレントバックアップ名の永続化
//!
//! 実行ファイルと同じ場所の `config.json` に全設定を保存する。
//! 読み込み失敗は既定値へのフォールバックで処理し、呼び出し側には伝播しない
//! （設定は安全性に関わらない表示用の状態のため）。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// 設定ファイル名（実行ファイルと同じディレクトリに置く）
const CONFIG_FILE_NAME: &str = "config.json";

/// アプリケーション設定
///
/// フィールドはすべて文字列。キーが欠けている場合は各フィールドが
/// 独立に既定値へフォールバックする。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Claudeのデータディレクトリ（バックアップ元）
    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// スナップショットの保存先ルート
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,

    /// Claudeの実行ファイルまたはショートカットのパス
    #[serde(default = "default_claude_path")]
    pub claude_path: String,

    /// 最後に復元したスナップショット名（表示用、未復元なら空）
    #[serde(default)]
    pub current_backup: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            backup_dir: default_backup_dir(),
            claude_path: default_claude_path(),
            current_backup: String::new(),
        }
    }
}

fn default_source_dir() -> String {
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("Claude")
        .join("Network")
        .to_string_lossy()
        .into_owned()
}

#[cfg(windows)]
fn default_claude_path() -> String {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(r"Microsoft\Windows\Start Menu\Programs\Anthropic\Claude.lnk")
        .to_string_lossy()
        .into_owned()
}

#[cfg(not(windows))]
fn default_claude_path() -> String {
    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(".local")
        .join("bin")
        .join("claude")
        .to_string_lossy()
        .into_owned()
}

/// Documentsフォルダの解決。OneDrive配下にDocumentsがあればそちらを優先する。
fn documents_dir() -> PathBuf {
    if let Ok(onedrive) = std::env::var("OneDrive") {
        let d = Path::new(&onedrive).join("Documents");
        if d.exists() {
            return d;
        }
    }
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_backup_dir() -> String {
    // 開発ビルドは実行ファイル隣の backup/、リリースビルドは
    // Documents/BackupClaude に保存する。
    let dir = if cfg!(debug_assertions) {
        exe_dir().join("backup")
    } else {
        documents_dir().join("BackupClaude")
    };
    dir.to_string_lossy().into_owned()
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 設定ストア
///
/// すべてのアクセサはロード→参照（または変更→保存）のペアで動作する。
/// 同時書き込みは想定しない（単一ユーザー・単一インスタンス前提）。
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// 既定の場所（実行ファイル隣の config.json）を使うストアを作成
    pub fn new() -> Self {
        Self {
            path: exe_dir().join(CONFIG_FILE_NAME),
        }
    }

    /// 設定ファイルの場所を指定してストアを作成（主にテスト用）
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 設定を読み込む。ファイルがない・読めない場合は既定値を返す。
    ///
    /// 読み込み成功時は backup_dir の存在をベストエフォートで保証する。
    pub fn load(&self) -> AppConfig {
        let config = match fs::read_to_string(&self.path) {
            Ok(data) => match serde_json::from_str::<AppConfig>(&data) {
                Ok(config) => config,
                Err(e) => {
                    warn!("設定の解析に失敗、既定値を使用: {e}");
                    AppConfig::default()
                }
            },
            Err(_) => AppConfig::default(),
        };

        if let Err(e) = fs::create_dir_all(&config.backup_dir) {
            warn!("バックアップディレクトリを作成できません: {e}");
        }

        config
    }

    /// 設定を保存する。成否をboolで返し、失敗しても例外は出さない。
    pub fn save(&self, config: &AppConfig) -> bool {
        let data = match serde_json::to_string_pretty(config) {
            Ok(data) => data,
            Err(e) => {
                warn!("設定のシリアライズに失敗: {e}");
                return false;
            }
        };
        match fs::write(&self.path, data) {
            Ok(()) => true,
            Err(e) => {
                warn!("設定の保存に失敗: {e}");
                false
            }
        }
    }

    pub fn get_source_dir(&self) -> String {
        self.load().source_dir
    }

    pub fn set_source_dir(&self, path: &str) -> bool {
        let mut config = self.load();
        config.source_dir = path.to_string();
        self.save(&config)
    }

    pub fn get_backup_dir(&self) -> String {
        self.load().backup_dir
    }

    /// バックアップ先を変更する。新しいディレクトリがなければ作成する。
    pub fn set_backup_dir(&self, path: &str) -> bool {
        let mut config = self.load();
        config.backup_dir = path.to_string();
        if let Err(e) = fs::create_dir_all(path) {
            warn!("バックアップディレクトリを作成できません: {e}");
        }
        self.save(&config)
    }

    pub fn get_claude_path(&self) -> String {
        self.load().claude_path
    }

    pub fn set_claude_path(&self, path: &str) -> bool {
        let mut config = self.load();
        config.claude_path = path.to_string();
        self.save(&config)
    }

    pub fn get_current_backup(&self) -> String {
        self.load().current_backup
    }

    pub fn set_current_backup(&self, name: &str) -> bool {
        let mut config = self.load();
        config.current_backup = name.to_string();
        self.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(temp: &TempDir) -> ConfigStore {
        ConfigStore::at(temp.path().join("config.json"))
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let config = store.load();
        assert_eq!(config, AppConfig::default());
        assert!(config.current_backup.is_empty());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let mut config = AppConfig::default();
        config.source_dir = temp.path().join("src").to_string_lossy().into_owned();
        config.backup_dir = temp.path().join("bak").to_string_lossy().into_owned();
        config.current_backup = "backup-claude-20250101_000000".to_string();

        assert!(store.save(&config));
        assert_eq!(store.load(), config);
    }

    #[test]
    fn test_missing_keys_fall_back_independently() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"current_backup": "backup-x-20250101_000000"}"#).unwrap();

        let config = ConfigStore::at(&path).load();
        assert_eq!(config.current_backup, "backup-x-20250101_000000");
        assert_eq!(config.source_dir, default_source_dir());
        assert_eq!(config.claude_path, default_claude_path());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(ConfigStore::at(&path).load(), AppConfig::default());
    }

    #[test]
    fn test_setters_persist_single_field() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        let backup_dir = temp.path().join("snapshots");

        assert!(store.set_backup_dir(&backup_dir.to_string_lossy()));
        assert!(backup_dir.exists());
        assert!(store.set_current_backup("backup-claude-20250101_000000"));

        let config = store.load();
        assert_eq!(config.backup_dir, backup_dir.to_string_lossy());
        assert_eq!(config.current_backup, "backup-claude-20250101_000000");
        // 他のフィールドは既定値のまま
        assert_eq!(config.source_dir, default_source_dir());
    }
}
