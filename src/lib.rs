//! Claude Backup Manager - Claudeユーザーデータのバックアップ・復元コア
//!
//! Claudeアプリのデータディレクトリをフルコピーのスナップショットとして
//! 保存・一覧・復元・削除するライブラリ。GUIからコマンド層経由で利用する。
//! - スナップショットは相互に独立したフルコピー（差分なし）
//! - 実行中のClaudeプロセスを検出・停止してから復元する安全プロトコル
//! - 設定はJSONファイルに永続化（読み込み失敗時は既定値へフォールバック）

pub mod backup;
pub mod commands;
pub mod config;
pub mod process;
pub mod restore;
