//! パッケージ全体の走査
//!
//! ルート以下の候補ファイルを順に読み込み、モジュールごとに解析して1つのレポートにまとめます。
//! 読み込みに失敗したモジュールは記録して次へ進みます。

use crate::analyzer::{NativeAnalyzer, WasmAnalyzer};
use crate::classifier::BridgeClassifier;
use crate::discovery::{dedup_paths, find_candidates, module_fqn};
use crate::report::{FailureReason, Report, ResultAggregator};
use crate::walker::WalkMode;
use crate::Result;
use hashi_symbols::{AddressSymbolizer, Demangle};
use hashi_target::ModuleHost;
use hashi_wasm::{ExportLister, WasmExportIndex};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// 走査の設定
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// パッケージのルートディレクトリ
    pub root: PathBuf,
    pub mode: WalkMode,
    /// 同名ファイルを1つにまとめる
    pub dedup: bool,
}

impl ScanConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mode: WalkMode::Native,
            dedup: false,
        }
    }

    pub fn with_mode(mut self, mode: WalkMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    /// 候補ファイルの拡張子
    pub fn extensions(&self) -> &'static [&'static str] {
        match self.mode {
            WalkMode::Native => &["node"],
            WalkMode::Wasm => &["js", "wasm"],
        }
    }

    /// 絶対パスにしたルートと候補ファイル
    fn candidates(&self) -> Result<(PathBuf, Vec<PathBuf>)> {
        let root = fs::canonicalize(&self.root)
            .map_err(|e| anyhow::anyhow!("Invalid package root {:?}: {}", self.root, e))?;
        let mut files = find_candidates(&root, self.extensions())?;
        if self.dedup {
            files = dedup_paths(&files, &root);
        }
        Ok((root, files))
    }
}

/// ネイティブ拡張（`.node`）を走査する
pub fn scan_native<H, S, D>(
    host: &H,
    symbolizer: &S,
    classifier: &BridgeClassifier<D>,
    config: &ScanConfig,
) -> Result<Report>
where
    H: ModuleHost,
    S: AddressSymbolizer,
    D: Demangle,
{
    let start = Instant::now();
    let (root, files) = config.candidates()?;
    info!("Native extension files: {}", files.len());

    let analyzer = NativeAnalyzer::new(host, symbolizer, classifier);
    let mut agg = ResultAggregator::new();
    for file in &files {
        let module_file = file.display().to_string();
        let fqn = module_fqn(file, &root);
        agg.add_module(module_file.clone());

        if let Some(value) = load(host, file, &fqn, &mut agg) {
            analyzer.analyze(&module_file, &fqn, value, &mut agg);
        }
    }

    Ok(agg.finish(start.elapsed()))
}

/// JS モジュールを読み込み、WASM 由来の関数を出自ファイルに対応付ける
pub fn scan_wasm<H, L>(host: &H, lister: &L, config: &ScanConfig) -> Result<Report>
where
    H: ModuleHost,
    L: ExportLister,
{
    let start = Instant::now();
    let (root, files) = config.candidates()?;
    let (wasm_files, js_files): (Vec<PathBuf>, Vec<PathBuf>) = files
        .into_iter()
        .partition(|f| f.extension().map(|e| e == "wasm").unwrap_or(false));
    info!("{} JS modules, {} WASM files", js_files.len(), wasm_files.len());

    let index = WasmExportIndex::build(&wasm_files, lister);
    let mut analyzer = WasmAnalyzer::new(host, &index)?;
    let mut agg = ResultAggregator::new().with_wasm_diagnostics();
    for file in &js_files {
        let fqn = module_fqn(file, &root);
        agg.add_module(file.display().to_string());

        if let Some(value) = load(host, file, &fqn, &mut agg) {
            analyzer.analyze(&fqn, value, &mut agg);
        }
    }

    Ok(agg.finish(start.elapsed()))
}

fn load<H: ModuleHost>(host: &H, file: &Path, fqn: &str, agg: &mut ResultAggregator) -> Option<H::Value> {
    match host.load_module(file) {
        Ok(value) => {
            info!("{}: analyzing as {}", file.display(), fqn);
            Some(value)
        }
        Err(e) => {
            warn!("{}: {}", file.display(), e);
            agg.fail(fqn, FailureReason::ModuleLoadFail);
            None
        }
    }
}
