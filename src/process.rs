//! Claudeプロセス制御 - 検出・段階的停止・起動
//!
//! 対象はイメージ名がClaudeの実行ファイルに一致するプロセス（自プロセスは除外）。
//! OSのプッシュ通知は使えないため、列挙のポーリングと上限付きの待機ループで
//! 生存確認を行う。OS固有の操作は `os` サブモジュールに分離している。

use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Claudeアプリのイメージ名（大文字小文字は区別しない）
#[cfg(windows)]
pub const CLAUDE_IMAGE_NAME: &str = "Claude.exe";
#[cfg(not(windows))]
pub const CLAUDE_IMAGE_NAME: &str = "claude";

/// 正常終了を待つ既定のタイムアウト
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(3);

/// 待機ループのポーリング間隔
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 強制終了後にファイルハンドル解放を待つ時間
const POST_KILL_SETTLE: Duration = Duration::from_millis(500);

/// 検出したClaudeプロセス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeProcess {
    pub pid: u32,
    pub name: String,
}

fn matches_image(name: &str) -> bool {
    name.eq_ignore_ascii_case(CLAUDE_IMAGE_NAME)
}

/// 列挙結果から対象プロセスを選ぶ（イメージ名一致、自PID除外）
fn select_targets(procs: Vec<ClaudeProcess>, own_pid: u32) -> Vec<ClaudeProcess> {
    procs
        .into_iter()
        .filter(|p| p.pid != own_pid && matches_image(&p.name))
        .collect()
}

/// 現在生きているClaudeプロセスを列挙する
///
/// 列挙中に消えたプロセスや読めない行は黙ってスキップする。
/// 結果はキャッシュせず、呼び出しごとに取り直す。
pub fn list_claude_processes() -> Vec<ClaudeProcess> {
    match os::enumerate() {
        Ok(procs) => select_targets(procs, std::process::id()),
        Err(e) => {
            warn!("プロセス一覧の取得に失敗: {e}");
            Vec::new()
        }
    }
}

/// Claudeが実行中かどうか
pub fn is_claude_running() -> bool {
    !list_claude_processes().is_empty()
}

/// Claudeプロセスを段階的に停止する
///
/// 正常終了シグナル → タイムアウト付き待機 → 強制終了 → イメージ名指定の
/// 最終手段、の順でエスカレーションする。戻り値は当初対象としたプロセス数
/// （0は対象なし）。0残存が保証されるわけではなく、プロトコルの完了を示す。
pub fn terminate_claude(timeout: Duration) -> usize {
    let targets = list_claude_processes();
    if targets.is_empty() {
        return 0;
    }
    info!("Claudeを停止します（{}プロセス）", targets.len());

    // 個々の失敗（終了済み・アクセス拒否）はバッチを止めない
    for p in &targets {
        if let Err(e) = os::terminate(p.pid) {
            warn!("PID {} への停止要求に失敗: {e}", p.pid);
        }
    }

    let deadline = Instant::now() + timeout;
    let mut remaining = alive_subset(&targets);
    while !remaining.is_empty() && Instant::now() < deadline {
        std::thread::sleep(WAIT_POLL_INTERVAL);
        remaining = alive_subset(&targets);
    }

    for p in &remaining {
        if let Err(e) = os::kill(p.pid) {
            warn!("PID {} の強制終了に失敗: {e}", p.pid);
        }
    }

    if !alive_subset(&remaining).is_empty() {
        // 最後の手段。これ自体の失敗は無視する。
        let _ = os::kill_by_image();
    }

    std::thread::sleep(POST_KILL_SETTLE);
    targets.len()
}

/// 対象のうちまだ生きているものを取り直す
fn alive_subset(targets: &[ClaudeProcess]) -> Vec<ClaudeProcess> {
    let alive = list_claude_processes();
    targets
        .iter()
        .filter(|t| alive.iter().any(|a| a.pid == t.pid))
        .cloned()
        .collect()
}

/// Claudeアプリを起動する
///
/// 設定されたパスを優先し、失敗したら既知のインストール先を順に試す。
/// 起動の失敗は例外にせずboolで報告する。
pub fn start_claude(configured_path: &str) -> bool {
    if !configured_path.is_empty() {
        let path = Path::new(configured_path);
        if path.exists() {
            match os::launch(path) {
                Ok(()) => {
                    info!("Claudeを起動: {configured_path}");
                    return true;
                }
                Err(e) => warn!("設定パスからの起動に失敗: {e}"),
            }
        }
    }

    for candidate in os::fallback_paths() {
        if candidate.exists() && os::launch(&candidate).is_ok() {
            info!("Claudeを起動: {}", candidate.display());
            return true;
        }
    }

    warn!("Claudeを起動できませんでした");
    false
}

#[cfg(windows)]
mod os {
    use super::ClaudeProcess;
    use anyhow::{ensure, Context, Result};
    use std::path::{Path, PathBuf};
    use std::process::{Command, Stdio};

    pub fn enumerate() -> Result<Vec<ClaudeProcess>> {
        let output = Command::new("tasklist")
            .args(["/FO", "CSV", "/NH"])
            .output()
            .context("tasklistの実行に失敗")?;
        Ok(parse_tasklist_csv(&String::from_utf8_lossy(&output.stdout)))
    }

    /// tasklist CSV出力（"イメージ名","PID",...）の解析
    pub(super) fn parse_tasklist_csv(output: &str) -> Vec<ClaudeProcess> {
        output
            .lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.trim().split("\",\"").collect();
                if fields.len() < 2 {
                    return None;
                }
                let name = fields[0].trim_start_matches('"').to_string();
                let pid = fields[1].trim_matches('"').parse().ok()?;
                Some(ClaudeProcess { pid, name })
            })
            .collect()
    }

    pub fn terminate(pid: u32) -> Result<()> {
        run_quiet("taskkill", &["/PID", &pid.to_string()])
    }

    pub fn kill(pid: u32) -> Result<()> {
        run_quiet("taskkill", &["/PID", &pid.to_string(), "/F"])
    }

    pub fn kill_by_image() -> Result<()> {
        run_quiet("taskkill", &["/IM", super::CLAUDE_IMAGE_NAME, "/F", "/T"])
    }

    fn run_quiet(program: &str, args: &[&str]) -> Result<()> {
        let status = Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("{program}の実行に失敗"))?;
        ensure!(status.success(), "{program}が失敗: {status}");
        Ok(())
    }

    pub fn launch(path: &Path) -> std::io::Result<()> {
        // start経由で起動すると.lnkショートカットも開ける
        Command::new("cmd")
            .args(["/C", "start", ""])
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    }

    pub fn fallback_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(local).join(r"Programs\Claude\Claude.exe"));
        }
        if let Ok(roaming) = std::env::var("APPDATA") {
            paths.push(PathBuf::from(roaming).join(r"Claude\Claude.exe"));
        }
        paths.push(PathBuf::from(r"C:\Program Files\Claude\Claude.exe"));
        paths.push(PathBuf::from(r"C:\Program Files (x86)\Claude\Claude.exe"));
        paths
    }

}

#[cfg(not(windows))]
mod os {
    use super::ClaudeProcess;
    use anyhow::{ensure, Context, Result};
    use std::path::{Path, PathBuf};
    use std::process::{Command, Stdio};

    pub fn enumerate() -> Result<Vec<ClaudeProcess>> {
        let output = Command::new("ps")
            .args(["-eo", "pid=,comm="])
            .output()
            .context("psの実行に失敗")?;
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }

    /// `ps -eo pid=,comm=` 出力の解析
    pub(super) fn parse_ps_output(output: &str) -> Vec<ClaudeProcess> {
        output
            .lines()
            .filter_map(|line| {
                let mut parts = line.trim().splitn(2, char::is_whitespace);
                let pid = parts.next()?.parse().ok()?;
                let comm = parts.next()?.trim();
                // フルパスで出る環境に備えてファイル名部分のみを使う
                let name = comm.rsplit('/').next().unwrap_or(comm).to_string();
                if name.is_empty() {
                    return None;
                }
                Some(ClaudeProcess { pid, name })
            })
            .collect()
    }

    pub fn terminate(pid: u32) -> Result<()> {
        run_quiet("kill", &["-TERM", &pid.to_string()])
    }

    pub fn kill(pid: u32) -> Result<()> {
        run_quiet("kill", &["-KILL", &pid.to_string()])
    }

    pub fn kill_by_image() -> Result<()> {
        run_quiet("pkill", &["-9", "-x", super::CLAUDE_IMAGE_NAME])
    }

    fn run_quiet(program: &str, args: &[&str]) -> Result<()> {
        let status = Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("{program}の実行に失敗"))?;
        ensure!(status.success(), "{program}が失敗: {status}");
        Ok(())
    }

    pub fn launch(path: &Path) -> std::io::Result<()> {
        Command::new(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    }

    pub fn fallback_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("/usr/local/bin/claude"),
            PathBuf::from("/usr/bin/claude"),
        ];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".local").join("bin").join("claude"));
        }
        paths
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32, name: &str) -> ClaudeProcess {
        ClaudeProcess {
            pid,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_select_targets_matches_case_insensitive() {
        let procs = vec![
            proc(1, CLAUDE_IMAGE_NAME),
            proc(2, &CLAUDE_IMAGE_NAME.to_uppercase()),
            proc(3, "other"),
        ];
        let targets = select_targets(procs, 999);
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_select_targets_excludes_own_pid() {
        let procs = vec![proc(42, CLAUDE_IMAGE_NAME), proc(43, CLAUDE_IMAGE_NAME)];
        let targets = select_targets(procs, 42);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].pid, 43);
    }

    #[test]
    fn test_select_targets_empty_input() {
        assert!(select_targets(Vec::new(), 1).is_empty());
    }
}
