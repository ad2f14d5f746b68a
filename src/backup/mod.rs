//! バックアップコアモジュール
//! スナップショットの作成・一覧・削除とファイルシステム補助を担当

mod fsutil;
mod repository;

pub use fsutil::*;
pub use repository::*;
