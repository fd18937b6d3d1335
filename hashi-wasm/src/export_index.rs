//! WASM エクスポート表
//!
//! ファイルごとに、関数インデックス→内部名、関数インデックス→エクスポート名の
//! 対応を静的に構築します。実行時の状態には依存しません。

use crate::objdump::ExportLister;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 1ファイル分のエクスポート表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmExportTable {
    pub file: PathBuf,
    /// インデックス -> 内部名（最初の出現を採用）
    pub idx_to_internal: BTreeMap<u32, String>,
    /// インデックス -> エクスポート名（別名があれば複数）
    pub idx_to_exports: BTreeMap<u32, Vec<String>>,
    /// 出現順のすべてのエクスポート名
    pub export_names: Vec<String>,
    name_set: BTreeSet<String>,
}

impl WasmExportTable {
    /// `wasm-objdump -xj Export` の出力から構築する
    ///
    /// `- func[IDX] <internalName> -> "exportName"` の行だけを読む。
    pub fn parse(file: impl Into<PathBuf>, listing: &str) -> Self {
        let line_pattern = export_line_pattern();

        let mut idx_to_internal = BTreeMap::new();
        let mut idx_to_exports: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        let mut export_names = Vec::new();

        for line in listing.lines() {
            let Some(caps) = line_pattern.captures(line) else {
                continue;
            };
            let Ok(index) = caps[1].parse::<u32>() else {
                continue;
            };
            let internal = caps[2].to_string();
            let export = caps[3].to_string();

            idx_to_internal.entry(index).or_insert(internal);
            idx_to_exports.entry(index).or_default().push(export.clone());
            export_names.push(export);
        }

        let name_set = export_names.iter().cloned().collect();
        Self {
            file: file.into(),
            idx_to_internal,
            idx_to_exports,
            export_names,
            name_set,
        }
    }

    /// 観測された名前をすべて含むか
    pub fn contains_all(&self, names: &[String]) -> bool {
        names.iter().all(|n| self.name_set.contains(n))
    }

    /// 重複を除いたエクスポート名の数
    pub fn distinct_export_count(&self) -> usize {
        self.name_set.len()
    }

    pub fn internal_name(&self, index: u32) -> Option<&str> {
        self.idx_to_internal.get(&index).map(String::as_str)
    }
}

fn export_line_pattern() -> Regex {
    Regex::new(r#"^\s*-\s*func\[(\d+)\]\s*<([^>]*)>\s*->\s*"([^"]*)"\s*$"#)
        .expect("export line pattern is valid")
}

/// 走査ルート配下のすべての WASM ファイルのエクスポート表
#[derive(Debug, Clone, Default)]
pub struct WasmExportIndex {
    tables: Vec<WasmExportTable>,
}

impl WasmExportIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// ファイルごとに一度だけ一覧を取得して構築する
    ///
    /// 一覧を取得できなかったファイルは警告して索引から外す。
    pub fn build<L: ExportLister>(files: &[PathBuf], lister: &L) -> Self {
        let mut index = Self::new();
        let mut done = BTreeSet::new();
        for file in files {
            if !done.insert(file.clone()) {
                continue;
            }
            match lister.list_exports(file) {
                Ok(listing) => {
                    let table = WasmExportTable::parse(file.clone(), &listing);
                    debug!(
                        "{}: {} exported functions",
                        file.display(),
                        table.export_names.len()
                    );
                    index.insert(table);
                }
                Err(e) => warn!("Skipping {}: {}", file.display(), e),
            }
        }
        index
    }

    pub fn insert(&mut self, table: WasmExportTable) {
        self.tables.retain(|t| t.file != table.file);
        self.tables.push(table);
    }

    pub fn tables(&self) -> &[WasmExportTable] {
        &self.tables
    }

    pub fn table(&self, file: &Path) -> Option<&WasmExportTable> {
        self.tables.iter().find(|t| t.file == file)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
