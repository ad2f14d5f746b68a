//! バックアップリポジトリ - スナップショットの作成・一覧・削除

use super::{copy_dir_recursive, dir_size};
use crate::config::AppConfig;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{info, warn};

/// スナップショット名の共通プレフィックス
pub const BACKUP_PREFIX: &str = "backup-";

/// 削除のリトライ回数（ロック中のファイルがある場合に備える）
const DELETE_ATTEMPTS: u32 = 3;

/// 削除リトライの間隔
const DELETE_RETRY_DELAY: Duration = Duration::from_millis(300);

/// バックアップエラー
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("ソースディレクトリが存在しません: {0}")]
    SourceMissing(PathBuf),

    #[error("バックアップが見つかりません: {0}")]
    NotFound(String),

    #[error("バックアップを削除できません（使用中またはロック中）: {name}")]
    Locked {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

/// スナップショット情報
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    /// スナップショット名（backup-<ラベル>-<タイムスタンプ>）
    pub name: String,

    /// 作成日時（ファイルシステムのメタデータ由来）
    pub created_at: DateTime<Local>,

    /// 含まれる全ファイルの合計サイズ（バイト、都度計算）
    pub size_bytes: u64,
}

/// バックアップリポジトリ
///
/// backup_dir 直下にスナップショットを配置する。各スナップショットは
/// ソースディレクトリのフルコピーで、相互に独立している。
pub struct BackupRepository {
    source_dir: PathBuf,
    backup_dir: PathBuf,
}

impl BackupRepository {
    pub fn new(source_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.source_dir, &config.backup_dir)
    }

    /// スナップショットの格納パス
    pub fn backup_path(&self, name: &str) -> PathBuf {
        self.backup_dir.join(name)
    }

    /// スナップショットを作成し、生成した名前を返す
    pub fn create(&self, label: &str) -> Result<String, BackupError> {
        if !self.source_dir.exists() {
            return Err(BackupError::SourceMissing(self.source_dir.clone()));
        }
        fs::create_dir_all(&self.backup_dir)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let name = format!("{BACKUP_PREFIX}{label}-{timestamp}");
        let dest = self.backup_path(&name);

        copy_dir_recursive(&self.source_dir, &dest)?;
        info!("バックアップを作成: {name}");

        Ok(name)
    }

    /// スナップショットの一覧を返す（新しい順）
    ///
    /// backup_dir 直下の backup- で始まるディレクトリのみを対象とする。
    /// 個々のエントリの読み取り失敗は一覧全体を失敗させない。
    pub fn list(&self) -> Vec<BackupEntry> {
        let Ok(entries) = fs::read_dir(&self.backup_dir) else {
            return Vec::new();
        };

        let mut backups: Vec<BackupEntry> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with(BACKUP_PREFIX) {
                    return None;
                }
                let metadata = entry.metadata().ok()?;
                if !metadata.is_dir() {
                    return None;
                }
                let created = metadata
                    .created()
                    .or_else(|_| metadata.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Some(BackupEntry {
                    created_at: created.into(),
                    size_bytes: dir_size(&entry.path()),
                    name,
                })
            })
            .collect();

        // 作成日時の降順、同時刻は名前の降順で安定化
        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        backups
    }

    /// スナップショットを削除する
    ///
    /// 配下のファイルが他プロセスに掴まれていると一時的に失敗することが
    /// あるため、ツリー全体の削除を一定回数リトライする。
    pub fn delete(&self, name: &str) -> Result<(), BackupError> {
        let path = self.backup_path(name);
        if !path.exists() {
            return Err(BackupError::NotFound(name.to_string()));
        }

        remove_tree_with_retry(&path, name, |p| fs::remove_dir_all(p))?;
        info!("バックアップを削除: {name}");
        Ok(())
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }
}

/// ツリー全体の削除をリトライする。最後の失敗原因はLockedに載せて返す。
fn remove_tree_with_retry<F>(path: &Path, name: &str, mut remove: F) -> Result<(), BackupError>
where
    F: FnMut(&Path) -> std::io::Result<()>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match remove(path) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < DELETE_ATTEMPTS => {
                warn!("削除に失敗（{attempt}回目）、再試行します: {e}");
                std::thread::sleep(DELETE_RETRY_DELAY);
            }
            Err(e) => {
                return Err(BackupError::Locked {
                    name: name.to_string(),
                    source: e,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, BackupRepository) {
        let source = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let repo = BackupRepository::new(source.path(), backups.path());
        (source, backups, repo)
    }

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(path).unwrap();
        write!(file, "{content}").unwrap();
    }

    #[test]
    fn test_create_names_and_copies() {
        let (source, _backups, repo) = setup();
        write_file(source.path(), "a.txt", "v1");
        write_file(source.path(), "sub/b.txt", "nested");

        let name = repo.create("claude").unwrap();

        // backup-<ラベル>-<YYYYMMDD_HHMMSS>
        assert!(name.starts_with("backup-claude-"));
        let timestamp = name.strip_prefix("backup-claude-").unwrap();
        assert_eq!(timestamp.len(), 15);
        let digits: Vec<char> = timestamp.chars().filter(|c| c.is_ascii_digit()).collect();
        assert_eq!(digits.len(), 14);
        assert_eq!(timestamp.chars().nth(8), Some('_'));

        let snapshot = repo.backup_path(&name);
        assert_eq!(fs::read_to_string(snapshot.join("a.txt")).unwrap(), "v1");
        assert_eq!(
            fs::read_to_string(snapshot.join("sub/b.txt")).unwrap(),
            "nested"
        );
    }

    #[test]
    fn test_create_fails_without_source() {
        let backups = TempDir::new().unwrap();
        let repo = BackupRepository::new(backups.path().join("no-such-dir"), backups.path());

        let result = repo.create("claude");
        assert!(matches!(result, Err(BackupError::SourceMissing(_))));
    }

    #[test]
    fn test_list_newest_first() {
        let (source, _backups, repo) = setup();
        write_file(source.path(), "a.txt", "data");

        let first = repo.create("first").unwrap();
        // タイムスタンプは1秒精度のため、名前とメタデータが確実に分かれるよう待つ
        std::thread::sleep(Duration::from_millis(1100));
        let second = repo.create("second").unwrap();

        let names: Vec<String> = repo.list().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec![second, first]);
    }

    #[test]
    fn test_list_ignores_foreign_entries() {
        let (source, backups, repo) = setup();
        write_file(source.path(), "a.txt", "data");
        repo.create("claude").unwrap();

        // プレフィックスの合わないディレクトリと通常ファイルは無視される
        fs::create_dir(backups.path().join("unrelated")).unwrap();
        write_file(backups.path(), "backup-not-a-dir", "file");

        let list = repo.list();
        assert_eq!(list.len(), 1);
        assert!(list[0].name.starts_with("backup-claude-"));
        assert_eq!(list[0].size_bytes, 4);
    }

    #[test]
    fn test_delete_removes_snapshot() {
        let (source, _backups, repo) = setup();
        write_file(source.path(), "a.txt", "data");
        let name = repo.create("claude").unwrap();
        assert_eq!(repo.list().len(), 1);

        repo.delete(&name).unwrap();
        assert!(repo.list().is_empty());
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let (_source, _backups, repo) = setup();
        let result = repo.delete("backup-none-20250101_000000");
        assert!(matches!(result, Err(BackupError::NotFound(_))));
    }

    fn locked_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "使用中")
    }

    #[test]
    fn test_delete_retry_exhaustion_is_locked() {
        let temp = TempDir::new().unwrap();
        let mut attempts = 0;

        // 削除が失敗し続けると規定回数で打ち切り、Lockedとして表面化する
        let result = remove_tree_with_retry(temp.path(), "backup-busy-20250101_000000", |_| {
            attempts += 1;
            Err(locked_error())
        });

        assert_eq!(attempts, DELETE_ATTEMPTS);
        match result {
            Err(BackupError::Locked { name, source }) => {
                assert_eq!(name, "backup-busy-20250101_000000");
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            other => panic!("Lockedになるはず: {other:?}"),
        }
    }

    #[test]
    fn test_delete_succeeds_after_transient_failure() {
        let temp = TempDir::new().unwrap();
        let mut attempts = 0;

        // 一時的なロックが解ければリトライ内で成功する
        let result = remove_tree_with_retry(temp.path(), "backup-busy-20250101_000000", |_| {
            attempts += 1;
            if attempts < 3 {
                Err(locked_error())
            } else {
                Ok(())
            }
        });

        assert!(result.is_ok());
        assert_eq!(attempts, 3);
    }
}
