//! 呼び出し可能オブジェクトのネイティブ情報の取得

use crate::walker::CallableRef;
use hashi_target::{DiagnosticParser, Introspector};
use tracing::trace;

/// 登録済みのネイティブコールバックとオーバーロード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCallback {
    pub address: u64,
    pub overloads: Vec<u64>,
}

/// ネイティブ関数としての判定結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 通常の関数（失敗ではない）
    NotNative,
    /// ネイティブだがコールバックが 0
    NullCallback,
    Native(RawCallback),
}

/// WASM 関数としての観測
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasmCallable {
    pub function_index: u32,
    pub instance_address: u64,
}

pub struct CallableProbe<'a, H: Introspector> {
    host: &'a H,
}

impl<'a, H: Introspector> CallableProbe<'a, H> {
    pub fn new(host: &'a H) -> Self {
        Self { host }
    }

    pub fn probe(&self, callable: &CallableRef<H::Value>) -> ProbeOutcome {
        match self.host.native_link_of(&callable.value) {
            None => ProbeOutcome::NotNative,
            Some(link) if link.callback == 0 => ProbeOutcome::NullCallback,
            Some(link) => {
                trace!(
                    "{}: callback 0x{:x}, {} overloads",
                    callable.fqn,
                    link.callback,
                    link.overloads.len()
                );
                ProbeOutcome::Native(RawCallback {
                    address: link.callback,
                    overloads: link.overloads,
                })
            }
        }
    }

    /// 診断テキストから WASM 関数インデックスとインスタンスを読む
    ///
    /// どちらかが欠けていれば WASM 由来とはみなさない。
    pub fn probe_wasm(
        &self,
        callable: &CallableRef<H::Value>,
        parser: &DiagnosticParser,
    ) -> Option<WasmCallable> {
        let text = self.host.diagnostic_text(&callable.value)?;
        let function_index = parser.wasm_function_index(&text)?;
        let instance_address = parser.wasm_instance_address(&text)?;
        Some(WasmCallable {
            function_index,
            instance_address,
        })
    }
}
