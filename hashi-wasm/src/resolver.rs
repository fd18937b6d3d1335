//! 実行時インスタンスと WASM ファイルの対応付け

use crate::export_index::WasmExportIndex;
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

/// インスタンスのエクスポートを観測できなかったときの理由
pub const REASON_INSTANCE_UNAVAILABLE: &str = "instance exports unavailable";
/// 選ばれたファイルに関数インデックスがなかったときの理由
pub const REASON_INDEX_NOT_IN_FILE: &str = "index not in file";

/// 1関数分の対応付け結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WasmResolution {
    /// ファイルが一意に決まり、インデックスの内部名が見つかった
    Resolved { file: PathBuf, internal_name: String },
    /// 候補ファイルが複数残った
    Ambiguous { candidates: Vec<PathBuf> },
    /// 候補がない、またはインデックスがファイルにない
    Unresolved {
        file: Option<PathBuf>,
        reason: Option<String>,
    },
}

/// エクスポート名の集合でインスタンスの出自ファイルを決める
pub struct WasmInstanceResolver<'a> {
    index: &'a WasmExportIndex,
}

impl<'a> WasmInstanceResolver<'a> {
    pub fn new(index: &'a WasmExportIndex) -> Self {
        Self { index }
    }

    /// 観測されたエクスポート名と関数インデックスから解決する
    ///
    /// 1. 観測名をすべて含むファイルを候補とする
    /// 2. 名前数が観測数と一致する候補が1つだけならそれを選ぶ
    /// 3. そうでなく候補が1つだけならそれを選ぶ
    /// 4. 候補が複数なら曖昧、なければ未解決
    pub fn resolve(&self, function_index: u32, observed: &[String]) -> WasmResolution {
        let candidates: Vec<_> = self
            .index
            .tables()
            .iter()
            .filter(|t| t.contains_all(observed))
            .collect();

        let observed_count = {
            let mut names: Vec<&String> = observed.iter().collect();
            names.sort();
            names.dedup();
            names.len()
        };
        let exact: Vec<_> = candidates
            .iter()
            .filter(|t| t.distinct_export_count() == observed_count)
            .collect();

        let chosen = if exact.len() == 1 {
            exact[0]
        } else if candidates.len() == 1 {
            &candidates[0]
        } else if candidates.len() > 1 {
            return WasmResolution::Ambiguous {
                candidates: candidates.iter().map(|t| t.file.clone()).collect(),
            };
        } else {
            return WasmResolution::Unresolved {
                file: None,
                reason: None,
            };
        };

        debug!(
            "Function index {} attributed to {}",
            function_index,
            chosen.file.display()
        );
        match chosen.internal_name(function_index) {
            Some(name) => WasmResolution::Resolved {
                file: chosen.file.clone(),
                internal_name: name.to_string(),
            },
            None => WasmResolution::Unresolved {
                file: Some(chosen.file.clone()),
                reason: Some(REASON_INDEX_NOT_IN_FILE.to_string()),
            },
        }
    }
}

/// レポートの ambiguous[] 要素
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WasmAmbiguity {
    pub fqn: String,
    pub idx: u32,
    pub jsnames: Vec<String>,
    pub candidates: Vec<PathBuf>,
}

/// レポートの unresolved[] 要素
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WasmUnresolved {
    pub fqn: String,
    pub idx: u32,
    pub jsnames: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
