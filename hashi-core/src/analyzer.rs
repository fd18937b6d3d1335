//! モジュール単位の解析
//!
//! ネイティブ経路は、走査で得た呼び出し可能オブジェクトを3回のバッチ解決
//! （主コールバック → 転送先 → 最終的な入口）で実装関数へ対応付けます。
//! 各段は前段の結果を受け取り、新しい型の結果を返します。
//! WASM 経路は、インスタンスのエクスポート名から出自ファイルを決めて内部名を引きます。

use crate::classifier::{BridgeClassifier, FirstHopDecision, SecondHopDecision};
use crate::probe::{CallableProbe, ProbeOutcome, RawCallback};
use crate::report::{Bridge, FailureReason, ResultAggregator};
use crate::walker::{ObjectGraphWalker, WalkMode, WalkStats};
use hashi_symbols::{AddressSymbolizer, Demangle, SymbolTable};
use hashi_target::{DiagnosticParser, Introspector};
use hashi_wasm::{
    InstanceCache, WasmAmbiguity, WasmExportIndex, WasmInstanceResolver, WasmResolution,
    WasmUnresolved, REASON_INSTANCE_UNAVAILABLE,
};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// ネイティブにリンクされた呼び出し可能オブジェクト
#[derive(Debug, Clone)]
struct LinkedCallable<V> {
    fqn: String,
    value: V,
    callback: RawCallback,
}

/// 次の段で解決を待つアドレス
#[derive(Debug, Clone)]
struct Pending<V> {
    fqn: String,
    value: V,
    address: u64,
}

/// 1段目の分類結果
#[derive(Debug)]
struct FirstHopOutcome<V> {
    second_hop: Vec<Pending<V>>,
    final_hop: Vec<Pending<V>>,
}

/// ネイティブ経路の解析器
pub struct NativeAnalyzer<'a, H: Introspector, S: AddressSymbolizer, D: Demangle> {
    host: &'a H,
    symbolizer: &'a S,
    classifier: &'a BridgeClassifier<D>,
}

impl<'a, H: Introspector, S: AddressSymbolizer, D: Demangle> NativeAnalyzer<'a, H, S, D> {
    pub fn new(host: &'a H, symbolizer: &'a S, classifier: &'a BridgeClassifier<D>) -> Self {
        Self {
            host,
            symbolizer,
            classifier,
        }
    }

    /// 1モジュールを解析して結果を集約器に加える
    ///
    /// `module_file` は読み込んだファイル、`module_fqn` はルートの名前。
    pub fn analyze(
        &self,
        module_file: &str,
        module_fqn: &str,
        root: H::Value,
        agg: &mut ResultAggregator,
    ) {
        let linked = self.collect(module_fqn, root, agg);
        if linked.is_empty() {
            debug!("{}: no native callables", module_fqn);
            return;
        }

        // wave 1: 主コールバックとオーバーロード
        let wave1: BTreeSet<u64> = linked
            .iter()
            .flat_map(|c| std::iter::once(c.callback.address).chain(c.callback.overloads.iter().copied()))
            .collect();
        let table1 = self.resolve_batch(module_fqn, 1, &wave1);

        self.emit_overloads(&linked, &table1, agg);
        let first = self.first_hop(linked, &table1, agg);

        // wave 2: 転送先
        let wave2: BTreeSet<u64> = first.second_hop.iter().map(|p| p.address).collect();
        let table2 = self.resolve_batch(module_fqn, 2, &wave2);

        let mut final_hop = first.final_hop;
        final_hop.extend(self.second_hop(first.second_hop, &table2, module_file, agg));

        // wave 3: 最終的な入口
        let wave3: BTreeSet<u64> = final_hop.iter().map(|p| p.address).collect();
        let table3 = self.resolve_batch(module_fqn, 3, &wave3);

        self.finalize(final_hop, &table3, agg);
    }

    /// 走査してネイティブ関数だけを残す
    fn collect(
        &self,
        module_fqn: &str,
        root: H::Value,
        agg: &mut ResultAggregator,
    ) -> Vec<LinkedCallable<H::Value>> {
        let mut stats = WalkStats::default();
        let callables = ObjectGraphWalker::new(self.host, WalkMode::Native).walk(root, module_fqn, &mut stats);
        agg.add_stats(&stats);

        let probe = CallableProbe::new(self.host);
        let mut linked = Vec::new();
        for callable in callables {
            match probe.probe(&callable) {
                ProbeOutcome::NotNative => {}
                ProbeOutcome::NullCallback => {
                    agg.add_foreign_callables(1);
                    agg.fail(callable.fqn, FailureReason::NullCallback);
                }
                ProbeOutcome::Native(callback) => {
                    agg.add_foreign_callables(1);
                    linked.push(LinkedCallable {
                        fqn: callable.fqn,
                        value: callable.value,
                        callback,
                    });
                }
            }
        }
        linked
    }

    /// 空のバッチは外部プロセスを起動しない。失敗は空の応答として扱う。
    fn resolve_batch(&self, module_fqn: &str, wave: u8, addresses: &BTreeSet<u64>) -> SymbolTable {
        if addresses.is_empty() {
            return SymbolTable::new();
        }
        match self.symbolizer.resolve(addresses) {
            Ok(table) => {
                info!(
                    "{}: wave {} resolved {}/{} addresses",
                    module_fqn,
                    wave,
                    table.len(),
                    addresses.len()
                );
                table
            }
            Err(e) => {
                warn!("{}: wave {} symbolizer failed: {}", module_fqn, wave, e);
                SymbolTable::new()
            }
        }
    }

    fn emit_overloads(
        &self,
        linked: &[LinkedCallable<H::Value>],
        table: &SymbolTable,
        agg: &mut ResultAggregator,
    ) {
        for callable in linked {
            for &address in &callable.callback.overloads {
                let Some(resolved) = table.get(address) else {
                    agg.fail(callable.fqn.clone(), FailureReason::OverloadResolutionFail);
                    continue;
                };
                match self.classifier.finalize(&callable.fqn, resolved) {
                    Ok(cfunc) => agg.add_bridge(Bridge::new(callable.fqn.clone(), cfunc, resolved.library.clone())),
                    Err(reason) => agg.fail(callable.fqn.clone(), reason),
                }
            }
        }
    }

    fn first_hop(
        &self,
        linked: Vec<LinkedCallable<H::Value>>,
        table: &SymbolTable,
        agg: &mut ResultAggregator,
    ) -> FirstHopOutcome<H::Value> {
        let mut outcome = FirstHopOutcome {
            second_hop: Vec::new(),
            final_hop: Vec::new(),
        };
        for callable in linked {
            let Some(resolved) = table.get(callable.callback.address) else {
                agg.fail(callable.fqn, FailureReason::CfuncAddressResolutionFail);
                continue;
            };
            let decision = self
                .classifier
                .classify_first_hop(self.host, &callable.value, &callable.fqn, resolved);
            match decision {
                FirstHopDecision::SecondHop(address) => outcome.second_hop.push(Pending {
                    fqn: callable.fqn,
                    value: callable.value,
                    address,
                }),
                FirstHopDecision::Final(address) => outcome.final_hop.push(Pending {
                    fqn: callable.fqn,
                    value: callable.value,
                    address,
                }),
                FirstHopDecision::Failed(reason) => agg.fail(callable.fqn, reason),
            }
        }
        outcome
    }

    fn second_hop(
        &self,
        pending: Vec<Pending<H::Value>>,
        table: &SymbolTable,
        module_file: &str,
        agg: &mut ResultAggregator,
    ) -> Vec<Pending<H::Value>> {
        let mut final_hop = Vec::new();
        for item in pending {
            let Some(resolved) = table.get(item.address) else {
                agg.fail(item.fqn, FailureReason::CfuncAddressResolutionFail);
                continue;
            };
            let decision =
                self.classifier
                    .classify_second_hop(self.host, &item.value, &item.fqn, resolved, module_file);
            match decision {
                SecondHopDecision::Bridge { cfunc, library } => {
                    agg.add_bridge(Bridge::new(item.fqn, cfunc, library))
                }
                SecondHopDecision::Final(address) => final_hop.push(Pending { address, ..item }),
                SecondHopDecision::Failed(reason) => agg.fail(item.fqn, reason),
            }
        }
        final_hop
    }

    fn finalize(&self, pending: Vec<Pending<H::Value>>, table: &SymbolTable, agg: &mut ResultAggregator) {
        for item in pending {
            let Some(resolved) = table.get(item.address) else {
                agg.fail(item.fqn, FailureReason::CfuncAddressResolutionFail);
                continue;
            };
            match self.classifier.finalize(&item.fqn, resolved) {
                Ok(cfunc) => agg.add_bridge(Bridge::new(item.fqn, cfunc, resolved.library.clone())),
                Err(reason) => agg.fail(item.fqn, reason),
            }
        }
    }
}

/// WASM 経路の解析器
///
/// インスタンスの観測結果はモジュールをまたいで再利用する。
pub struct WasmAnalyzer<'a, H: Introspector> {
    host: &'a H,
    index: &'a WasmExportIndex,
    parser: DiagnosticParser,
    instances: InstanceCache,
}

impl<'a, H: Introspector> WasmAnalyzer<'a, H> {
    pub fn new(host: &'a H, index: &'a WasmExportIndex) -> crate::Result<Self> {
        Ok(Self {
            host,
            index,
            parser: DiagnosticParser::new()?,
            instances: InstanceCache::new(),
        })
    }

    pub fn analyze(&mut self, module_fqn: &str, root: H::Value, agg: &mut ResultAggregator) {
        let mut stats = WalkStats::default();
        let callables = ObjectGraphWalker::new(self.host, WalkMode::Wasm).walk(root, module_fqn, &mut stats);
        agg.add_stats(&stats);

        let probe = CallableProbe::new(self.host);
        let resolver = WasmInstanceResolver::new(self.index);
        for callable in callables {
            let Some(wasm) = probe.probe_wasm(&callable, &self.parser) else {
                continue;
            };
            agg.add_foreign_callables(1);
            let idx = wasm.function_index;

            let observed = self
                .instances
                .observe(self.host, &self.parser, wasm.instance_address)
                .map(|o| o.export_names.clone());
            let Some(jsnames) = observed else {
                agg.add_unresolved(WasmUnresolved {
                    fqn: callable.fqn,
                    idx,
                    jsnames: Vec::new(),
                    file: None,
                    reason: Some(REASON_INSTANCE_UNAVAILABLE.to_string()),
                });
                continue;
            };

            match resolver.resolve(idx, &jsnames) {
                WasmResolution::Resolved { file, internal_name } => {
                    agg.add_bridge(Bridge::new(callable.fqn, internal_name, file.display().to_string()))
                }
                WasmResolution::Ambiguous { candidates } => agg.add_ambiguous(WasmAmbiguity {
                    fqn: callable.fqn,
                    idx,
                    jsnames,
                    candidates,
                }),
                WasmResolution::Unresolved { file, reason } => agg.add_unresolved(WasmUnresolved {
                    fqn: callable.fqn,
                    idx,
                    jsnames,
                    file,
                    reason,
                }),
            }
        }
    }
}
