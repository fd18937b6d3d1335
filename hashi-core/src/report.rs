//! 解析結果の集約とレポート

use crate::walker::WalkStats;
use crate::Result;
use hashi_wasm::{WasmAmbiguity, WasmUnresolved};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// JS の呼び出し可能オブジェクトからネイティブ実装への対応
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bridge {
    pub jsname: String,
    pub cfunc: String,
    pub library: String,
}

impl Bridge {
    pub fn new(jsname: impl Into<String>, cfunc: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            jsname: jsname.into(),
            cfunc: cfunc.into(),
            library: library.into(),
        }
    }
}

/// fqn 単位の失敗理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// ネイティブ関数だがコールバックが登録されていない
    NullCallback,
    ExtractFcbInvokeFail,
    ExtractNapiFail,
    ExtractNanFail,
    NeonExtractionFail,
    OverloadResolutionFail,
    CfuncAddressResolutionFail,
    WasmAmbiguous,
    WasmUnresolved,
    /// モジュールの読み込み自体に失敗した（キーはモジュールの fqn）
    ModuleLoadFail,
    DemangleFail,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::NullCallback => "NULL_CALLBACK",
            FailureReason::ExtractFcbInvokeFail => "EXTRACT_FCB_INVOKE_FAIL",
            FailureReason::ExtractNapiFail => "EXTRACT_NAPI_FAIL",
            FailureReason::ExtractNanFail => "EXTRACT_NAN_FAIL",
            FailureReason::NeonExtractionFail => "NEON_EXTRACTION_FAIL",
            FailureReason::OverloadResolutionFail => "OVERLOAD_RESOLUTION_FAIL",
            FailureReason::CfuncAddressResolutionFail => "CFUNC_ADDRESS_RESOLUTION_FAIL",
            FailureReason::WasmAmbiguous => "WASM_AMBIGUOUS",
            FailureReason::WasmUnresolved => "WASM_UNRESOLVED",
            FailureReason::ModuleLoadFail => "MODULE_LOAD_FAIL",
            FailureReason::DemangleFail => "DEMANGLE_FAIL",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1回の走査の最終レポート
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub objects_examined: usize,
    pub callable_objects: usize,
    pub foreign_callable_objects: usize,
    pub duration_sec: u64,
    pub count: usize,
    pub modules: Vec<String>,
    pub jump_libs: Vec<String>,
    pub bridges: Vec<Bridge>,
    pub failed: BTreeMap<String, FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambiguous: Option<Vec<WasmAmbiguity>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<Vec<WasmUnresolved>>,
}

impl Report {
    /// 整形済み JSON を書き出す（パスがなければ標準出力）
    pub fn write(&self, output: Option<&Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        match output {
            Some(path) => {
                fs::write(path, json + "\n")
                    .map_err(|e| anyhow::anyhow!("Failed to write report {:?}: {}", path, e))?;
                info!("Wrote {} bridges to {}", self.count, path.display());
            }
            None => println!("{}", json),
        }
        Ok(())
    }
}

/// 走査全体の結果を蓄積する
///
/// ライブラリ一覧は重複なしの挿入順、失敗は fqn ごとに後勝ち。
#[derive(Debug, Default)]
pub struct ResultAggregator {
    modules: Vec<String>,
    jump_libs: Vec<String>,
    known_libs: HashSet<String>,
    bridges: Vec<Bridge>,
    failed: BTreeMap<String, FailureReason>,
    stats: WalkStats,
    foreign_callable_objects: usize,
    wasm_diagnostics: bool,
    ambiguous: Vec<WasmAmbiguity>,
    unresolved: Vec<WasmUnresolved>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// ambiguous[] / unresolved[] をレポートに含める
    pub fn with_wasm_diagnostics(mut self) -> Self {
        self.wasm_diagnostics = true;
        self
    }

    pub fn add_module(&mut self, module_file: impl Into<String>) {
        self.modules.push(module_file.into());
    }

    pub fn add_bridge(&mut self, bridge: Bridge) {
        debug!("Bridge {} -> {} ({})", bridge.jsname, bridge.cfunc, bridge.library);
        if self.known_libs.insert(bridge.library.clone()) {
            self.jump_libs.push(bridge.library.clone());
        }
        self.bridges.push(bridge);
    }

    pub fn fail(&mut self, fqn: impl Into<String>, reason: FailureReason) {
        let fqn = fqn.into();
        debug!("{}: {}", fqn, reason);
        self.failed.insert(fqn, reason);
    }

    pub fn add_stats(&mut self, stats: &WalkStats) {
        self.stats.merge(stats);
    }

    pub fn add_foreign_callables(&mut self, count: usize) {
        self.foreign_callable_objects += count;
    }

    pub fn add_ambiguous(&mut self, entry: WasmAmbiguity) {
        self.fail(entry.fqn.clone(), FailureReason::WasmAmbiguous);
        self.ambiguous.push(entry);
    }

    pub fn add_unresolved(&mut self, entry: WasmUnresolved) {
        self.fail(entry.fqn.clone(), FailureReason::WasmUnresolved);
        self.unresolved.push(entry);
    }

    pub fn bridges(&self) -> &[Bridge] {
        &self.bridges
    }

    pub fn failures(&self) -> &BTreeMap<String, FailureReason> {
        &self.failed
    }

    pub fn finish(self, elapsed: Duration) -> Report {
        let (ambiguous, unresolved) = if self.wasm_diagnostics {
            (Some(self.ambiguous), Some(self.unresolved))
        } else {
            (None, None)
        };
        Report {
            objects_examined: self.stats.objects_examined,
            callable_objects: self.stats.callable_objects,
            foreign_callable_objects: self.foreign_callable_objects,
            duration_sec: elapsed.as_secs_f64().round() as u64,
            count: self.bridges.len(),
            modules: self.modules,
            jump_libs: self.jump_libs,
            bridges: self.bridges,
            failed: self.failed,
            ambiguous,
            unresolved,
        }
    }
}
