//! 外部プロセスの実行
//!
//! シンボライザや逆アセンブラなど、外部ツールをタイムアウト付きで起動し、
//! 標準出力と標準エラーを一時ファイル経由で回収します。

use crate::Result;
use std::fs;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 終了を待つ間のポーリング間隔
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 完了した外部プロセスの出力
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// SIGTERM 後に SIGKILL を送るまでの猶予
const TERM_GRACE: Duration = Duration::from_millis(500);

/// 実行中の子プロセス
///
/// 子プロセスは専用のプロセスグループで起動する。待機を途中で抜けた場合は
/// Drop 時にグループごと終了させ、孫プロセス（ヘルパーが起動した gdb など）も残さない。
struct RunningChild {
    child: Child,
    finished: bool,
}

impl RunningChild {
    fn spawn(command: &mut Command) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn {:?}: {}", command.get_program(), e))?;
        Ok(Self {
            child,
            finished: false,
        })
    }

    /// 期限まで終了を待つ。期限切れなら None
    fn wait_until(&mut self, deadline: Instant) -> Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.finished = true;
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// プロセスグループ全体を終了させる
    ///
    /// sudo は SIGKILL を中継できないため、先に SIGTERM を送って猶予を与える。
    #[cfg(unix)]
    fn terminate(&mut self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let group = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = killpg(group, Signal::SIGTERM) {
            debug!("SIGTERM to process group {} failed: {}", group, e);
        }
        let deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
        // 子が先に終わっていてもグループに孫が残っていれば届く
        let _ = killpg(group, Signal::SIGKILL);
        let _ = self.child.wait();
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for RunningChild {
    fn drop(&mut self) {
        if !self.finished {
            self.terminate();
        }
    }
}

/// コマンドを実行し、出力を回収する
///
/// タイムアウトした場合はプロセスグループごと終了させて `Ok(None)` を返す。
/// 起動できなかった場合はエラーを返す。
pub fn run_captured(command: &mut Command, timeout: Duration) -> Result<Option<CapturedOutput>> {
    let scratch = tempfile::tempdir()?;
    let out_path = scratch.path().join("stdout");
    let err_path = scratch.path().join("stderr");

    command
        .stdin(Stdio::null())
        .stdout(fs::File::create(&out_path)?)
        .stderr(fs::File::create(&err_path)?);

    debug!("Running {:?} (timeout {:?})", command, timeout);

    let mut child = RunningChild::spawn(command)?;
    let status = match child.wait_until(Instant::now() + timeout)? {
        Some(status) => status,
        None => {
            warn!("{:?} did not finish within {:?}", command.get_program(), timeout);
            return Ok(None);
        }
    };

    let stdout = String::from_utf8_lossy(&fs::read(&out_path)?).into_owned();
    let stderr = String::from_utf8_lossy(&fs::read(&err_path)?).into_owned();

    Ok(Some(CapturedOutput {
        status,
        stdout,
        stderr,
    }))
}
