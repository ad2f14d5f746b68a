//! ファイルシステム補助 - 再帰コピー、サイズ集計、サイズ表示

use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// ディレクトリツリーを丸ごとコピーする
///
/// 構造とファイル内容を保持する。途中で失敗した場合はエラーを伝播し、
/// 部分的に書き込まれたコピー先の後始末は行わない（成功扱いにはしない）。
pub fn copy_dir_recursive(source: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
        // シンボリックリンク等の特殊ファイルはコピー対象外
    }

    Ok(())
}

/// ディレクトリ配下の通常ファイルの合計サイズを求める
///
/// 読めないエントリは集計から除外するだけで、全体を失敗させない。
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// バイト数を人間が読みやすい形式に変換する（例: 1536 → "1.50 KB"）
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} {}", UNITS[UNITS.len() - 1])
}
