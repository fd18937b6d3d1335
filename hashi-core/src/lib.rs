//! Hashi のコア機能
//!
//! このクレートは、ネイティブブリッジ探索の中核となるロジックを提供します。
//! 値の木の走査、ネイティブ情報の取得、バインディング規約の分類、
//! バッチ解決を挟んだモジュール単位の解析、結果の集約を統合します。

pub mod analyzer;
pub mod classifier;
pub mod discovery;
pub mod probe;
pub mod report;
pub mod scan;
pub mod walker;

pub use analyzer::{NativeAnalyzer, WasmAnalyzer};
pub use classifier::{BridgeClassifier, FirstHopDecision, Rule, SecondHopDecision};
pub use discovery::{dedup_paths, find_candidates, module_fqn};
pub use probe::{CallableProbe, ProbeOutcome, RawCallback, WasmCallable};
pub use report::{Bridge, FailureReason, Report, ResultAggregator};
pub use scan::{scan_native, scan_wasm, ScanConfig};
pub use walker::{CallableRef, ObjectGraphWalker, WalkMode, WalkStats};

// 他のクレートから使用するために再エクスポート
pub use hashi_symbols::{AddressSymbolizer, SymbolTable};
pub use hashi_target::{HeapSnapshot, ModuleHost};

/// コア機能の結果型
pub type Result<T> = anyhow::Result<T>;
