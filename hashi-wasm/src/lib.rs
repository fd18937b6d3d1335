//! Hashi WASM 解析
//!
//! このクレートは、WASM ファイルのエクスポート表の構築、実行時インスタンスのエクスポート観測、
//! およびインスタンスと出自ファイルの対応付けを提供します。

pub mod export_index;
pub mod instance;
pub mod objdump;
pub mod resolver;

pub use export_index::{WasmExportIndex, WasmExportTable};
pub use instance::{InstanceCache, WasmInstanceObservation};
pub use objdump::{ExportLister, WasmObjdump};
pub use resolver::{
    WasmAmbiguity, WasmInstanceResolver, WasmResolution, WasmUnresolved,
    REASON_INDEX_NOT_IN_FILE, REASON_INSTANCE_UNAVAILABLE,
};

/// WASM 解析の結果型
pub type Result<T> = anyhow::Result<T>;
