//! 値の木の幅優先走査
//!
//! モジュールのルートから辿れるすべての値を一度ずつ訪問し、
//! 呼び出し可能なものを観測として返します。

use hashi_target::{DiagnosticParser, Introspector, ObjectId, ValueKind};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace};

/// 走査モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkMode {
    /// エンジン識別子だけで重複を除く
    #[default]
    Native,
    /// WASM 由来の値は識別子と診断テキストの組で重複を除く
    Wasm,
}

/// 呼び出し可能オブジェクトの観測
#[derive(Debug, Clone)]
pub struct CallableRef<V> {
    /// ルートからのパス（`pkg/index.add` など）
    pub fqn: String,
    pub value: V,
    pub identity: ObjectId,
    /// 見つけたときに展開していた親
    pub parent: Option<ObjectId>,
}

/// 走査の統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// 取得に成功した子の数
    pub objects_examined: usize,
    /// 観測した呼び出し可能オブジェクトの数
    pub callable_objects: usize,
}

impl WalkStats {
    pub fn merge(&mut self, other: &WalkStats) {
        self.objects_examined += other.objects_examined;
        self.callable_objects += other.callable_objects;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SeenKey {
    Identity(ObjectId),
    WasmBacked(ObjectId, String),
}

/// 幅優先のグラフ走査器
pub struct ObjectGraphWalker<'a, H: Introspector> {
    host: &'a H,
    mode: WalkMode,
}

impl<'a, H: Introspector> ObjectGraphWalker<'a, H> {
    pub fn new(host: &'a H, mode: WalkMode) -> Self {
        Self { host, mode }
    }

    /// ルートから走査して呼び出し可能オブジェクトを列挙する
    ///
    /// 同じ識別子に複数の経路で到達した場合は、最も浅く、その中で最初に列挙された経路だけを採用する。
    pub fn walk(
        &self,
        root: H::Value,
        root_name: &str,
        stats: &mut WalkStats,
    ) -> Vec<CallableRef<H::Value>> {
        let mut callables = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        seen.insert(self.seen_key(&root));
        queue.push_back((root, root_name.to_string(), None));

        while let Some((value, name, parent)) = queue.pop_front() {
            let kind = self.host.kind(&value);
            if !kind.is_object_like() {
                continue;
            }
            let identity = self.host.identity_of(&value);
            trace!("Visiting {} ({})", name, identity);

            for accessor in self.host.accessors(&value) {
                let halves = [(accessor.getter, "GET"), (accessor.setter, "SET")];
                for (function, suffix) in halves {
                    let Some(function) = function else { continue };
                    if self.host.kind(&function) != ValueKind::Function {
                        continue;
                    }
                    let fqn = format!("{}.{}.{}", name, accessor.name, suffix);
                    callables.push(self.observe(fqn, function, Some(identity), stats));
                }
            }

            if kind == ValueKind::Function {
                callables.push(self.observe(name.clone(), value.clone(), parent, stats));
            }

            for key in self.host.property_names(&value) {
                let child = match self.host.get(&value, &key) {
                    Ok(child) => child,
                    Err(e) => {
                        trace!("{}: {}", name, e);
                        continue;
                    }
                };
                stats.objects_examined += 1;
                if !self.host.kind(&child).is_object_like() {
                    continue;
                }
                if !seen.insert(self.seen_key(&child)) {
                    continue;
                }
                queue.push_back((child, format!("{}.{}", name, key), Some(identity)));
            }
        }

        debug!(
            "{}: {} callables, {} objects examined",
            root_name,
            callables.len(),
            stats.objects_examined
        );
        callables
    }

    fn observe(
        &self,
        fqn: String,
        value: H::Value,
        parent: Option<ObjectId>,
        stats: &mut WalkStats,
    ) -> CallableRef<H::Value> {
        stats.callable_objects += 1;
        let identity = self.host.identity_of(&value);
        CallableRef {
            fqn,
            value,
            identity,
            parent,
        }
    }

    fn seen_key(&self, value: &H::Value) -> SeenKey {
        let identity = self.host.identity_of(value);
        if self.mode == WalkMode::Wasm {
            if let Some(text) = self.host.diagnostic_text(value) {
                if DiagnosticParser::mentions_wasm(&text) {
                    return SeenKey::WasmBacked(identity, text);
                }
            }
        }
        SeenKey::Identity(identity)
    }
}
