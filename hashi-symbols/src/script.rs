//! ファイル交換型のシンボライザクライアント
//!
//! 要求ファイル（10進アドレス文字列の JSON 配列）を書き出し、外部ヘルパーを
//! `-p <pid> -i <要求> -o <応答>` で起動して、応答ファイルを読み込みます。

use crate::address::canonical;
use crate::process::run_captured;
use crate::symbols::{AddressSymbolizer, ResponseEntry, SymbolTable};
use crate::Result;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 外部ヘルパーを呼び出すシンボライザ
#[derive(Debug, Clone)]
pub struct ScriptSymbolizer {
    /// ヘルパーの実行ファイル
    program: PathBuf,
    /// `-p` より前に渡す引数（サブコマンド名など）
    prefix_args: Vec<String>,
    /// 対象プロセスID
    pid: u32,
    timeout: Duration,
}

impl ScriptSymbolizer {
    pub fn new(program: impl Into<PathBuf>, pid: u32) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            pid,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl AddressSymbolizer for ScriptSymbolizer {
    fn resolve(&self, addresses: &BTreeSet<u64>) -> Result<SymbolTable> {
        let scratch = tempfile::tempdir()?;
        let request_path = scratch.path().join("addresses.json");
        let response_path = scratch.path().join("resolved.json");

        let request: Vec<String> = addresses.iter().map(|a| canonical(*a)).collect();
        fs::write(&request_path, serde_json::to_string_pretty(&request)?)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.prefix_args)
            .arg("-p")
            .arg(self.pid.to_string())
            .arg("-i")
            .arg(&request_path)
            .arg("-o")
            .arg(&response_path);

        info!("Resolving {} addresses in process {}", request.len(), self.pid);

        let output = match run_captured(&mut command, self.timeout)? {
            Some(output) => output,
            // 期限切れはバッチ全体が未解決という扱い
            None => return Ok(SymbolTable::new()),
        };
        debug!("symbolizer stdout: {}", output.stdout);
        if !output.status.success() {
            warn!(
                "Symbolizer exited with {}: {}",
                output.status,
                output.stderr.trim()
            );
        }

        let raw = match fs::read_to_string(&response_path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Symbolizer produced no response file: {}", e);
                return Ok(SymbolTable::new());
            }
        };
        let response: HashMap<String, ResponseEntry> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Malformed symbolizer response: {}", e))?;

        let table = SymbolTable::from_response(response);
        debug!("Resolved {}/{} addresses", table.len(), request.len());
        Ok(table)
    }
}
