//! WASM 逆アセンブラの呼び出し
//!
//! `wasm-objdump -xj Export <file>` でエクスポートセクションの一覧を取得します。

use crate::Result;
use hashi_symbols::run_captured;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// WASM ファイルのエクスポート一覧をテキストで返す
pub trait ExportLister {
    fn list_exports(&self, file: &Path) -> Result<String>;
}

/// wasm-objdump を使うエクスポート一覧取得
#[derive(Debug, Clone)]
pub struct WasmObjdump {
    program: PathBuf,
    timeout: Duration,
}

impl WasmObjdump {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("wasm-objdump"),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for WasmObjdump {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportLister for WasmObjdump {
    fn list_exports(&self, file: &Path) -> Result<String> {
        let mut command = Command::new(&self.program);
        command.arg("-xj").arg("Export").arg(file);

        let output = run_captured(&mut command, self.timeout)?
            .ok_or_else(|| anyhow::anyhow!("{:?} timed out on {:?}", self.program, file))?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "{:?} failed on {:?} ({}): {}",
                self.program,
                file,
                output.status,
                output.stderr.trim()
            ));
        }
        Ok(output.stdout)
    }
}
