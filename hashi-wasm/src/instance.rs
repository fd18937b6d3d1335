//! 実行時 WASM インスタンスの観測
//!
//! インスタンスアドレスから exports オブジェクトへ2段たどり、
//! JS から見えるエクスポート名の集合を取り出してキャッシュします。

use hashi_target::{DiagnosticParser, Introspector};
use std::collections::HashMap;
use tracing::{debug, warn};

/// 1インスタンス分の観測結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmInstanceObservation {
    pub instance_address: u64,
    pub export_names: Vec<String>,
}

/// インスタンスアドレスごとの観測キャッシュ
///
/// 最初にそのインスタンスを報告した関数で観測し、以降は再利用する。
/// 観測できなかったインスタンスも None としてキャッシュする。
#[derive(Debug, Default)]
pub struct InstanceCache {
    observations: HashMap<u64, Option<WasmInstanceObservation>>,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe<H: Introspector>(
        &mut self,
        host: &H,
        parser: &DiagnosticParser,
        instance_address: u64,
    ) -> Option<&WasmInstanceObservation> {
        self.observations
            .entry(instance_address)
            .or_insert_with(|| Self::read_instance(host, parser, instance_address))
            .as_ref()
    }

    fn read_instance<H: Introspector>(
        host: &H,
        parser: &DiagnosticParser,
        instance_address: u64,
    ) -> Option<WasmInstanceObservation> {
        let exports_address = host
            .diagnostic_text_at(instance_address)
            .and_then(|text| parser.exports_object_address(&text));
        let Some(exports_address) = exports_address else {
            warn!("No exports object for instance 0x{:x}", instance_address);
            return None;
        };
        let Some(exports_text) = host.diagnostic_text_at(exports_address) else {
            warn!(
                "Exports object 0x{:x} of instance 0x{:x} is unreadable",
                exports_address, instance_address
            );
            return None;
        };

        let export_names = parser.export_names(&exports_text);
        debug!(
            "Instance 0x{:x} exports {:?}",
            instance_address, export_names
        );
        Some(WasmInstanceObservation {
            instance_address,
            export_names,
        })
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
