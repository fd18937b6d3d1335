//! ヒープスナップショット
//!
//! 対象プロセス内のエージェントが書き出した JSON ダンプを読み込み、
//! 内省能力として提供します。ダンプには、モジュールごとのルートオブジェクト、
//! オブジェクトのプロパティとアクセサ、ネイティブリンク、診断テキスト、
//! 専用抽出器の結果が含まれます。

use crate::graph::{AccessError, Accessor, ObjectGraph, ObjectId, ValueKind};
use crate::introspect::{Introspector, ModuleHost, NativeLink, TrampolineKind};
use crate::Result;
use hashi_symbols::Address;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

/// スナップショット内の値
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotValue {
    /// オブジェクト（スナップショット内のID）
    Object(u64),
    Primitive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ObjectKind {
    #[default]
    Object,
    Function,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotProperty {
    name: String,
    /// 参照先のオブジェクトID（なければプリミティブ）
    #[serde(default, rename = "ref")]
    target: Option<u64>,
    /// アクセス時に例外を投げる
    #[serde(default)]
    throws: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotAccessor {
    name: String,
    #[serde(default)]
    get: Option<u64>,
    #[serde(default)]
    set: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotNativeLink {
    callback: Address,
    #[serde(default)]
    overloads: Vec<Address>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SnapshotTrampolines {
    #[serde(default)]
    function_callback_invoke: Option<Address>,
    #[serde(default)]
    nan: Option<Address>,
    #[serde(default)]
    napi: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotObject {
    id: u64,
    #[serde(default)]
    kind: ObjectKind,
    /// エンジンレベルの識別子（省略時は id）
    #[serde(default)]
    identity: Option<u64>,
    #[serde(default)]
    prototype: Option<u64>,
    #[serde(default)]
    properties: Vec<SnapshotProperty>,
    #[serde(default)]
    accessors: Vec<SnapshotAccessor>,
    #[serde(default)]
    native: Option<SnapshotNativeLink>,
    #[serde(default)]
    diagnostic: Option<String>,
    #[serde(default)]
    trampolines: SnapshotTrampolines,
    #[serde(default)]
    descriptor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    pid: Option<u32>,
    /// モジュールファイルのパス -> ルートオブジェクトID
    #[serde(default)]
    modules: BTreeMap<String, u64>,
    #[serde(default)]
    objects: Vec<SnapshotObject>,
    /// 生アドレス -> 診断テキスト
    #[serde(default)]
    addresses: HashMap<Address, String>,
}

/// 読み込み済みのヒープスナップショット
#[derive(Debug, Clone, Default)]
pub struct HeapSnapshot {
    pid: Option<u32>,
    modules: BTreeMap<String, u64>,
    objects: HashMap<u64, SnapshotObject>,
    addresses: HashMap<u64, String>,
}

impl HeapSnapshot {
    /// JSON ファイルから読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read snapshot {:?}: {}", path, e))?;
        Self::from_json(&raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse snapshot {:?}: {}", path, e))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: SnapshotFile = serde_json::from_str(raw)?;
        Ok(Self::from_file(file))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let file: SnapshotFile = serde_json::from_value(value)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: SnapshotFile) -> Self {
        let objects = file.objects.into_iter().map(|o| (o.id, o)).collect();
        let addresses = file
            .addresses
            .into_iter()
            .map(|(addr, text)| (addr.0, text))
            .collect();
        Self {
            pid: file.pid,
            modules: file.modules,
            objects,
            addresses,
        }
    }

    /// ダンプ元のプロセスID
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// スナップショットに含まれるモジュールファイル
    pub fn module_files(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// ID からオブジェクトの値を作る
    pub fn value(&self, id: u64) -> SnapshotValue {
        SnapshotValue::Object(id)
    }

    fn object(&self, value: &SnapshotValue) -> Option<&SnapshotObject> {
        match value {
            SnapshotValue::Object(id) => self.objects.get(id),
            SnapshotValue::Primitive => None,
        }
    }

    fn to_value(&self, target: Option<u64>) -> SnapshotValue {
        match target {
            Some(id) => SnapshotValue::Object(id),
            None => SnapshotValue::Primitive,
        }
    }

    /// 自身から始まるプロトタイプチェーン（循環は打ち切る）
    fn chain<'a>(&'a self, start: &'a SnapshotObject) -> Vec<&'a SnapshotObject> {
        let mut chain = vec![start];
        let mut visited = HashSet::from([start.id]);
        let mut next = start.prototype;
        while let Some(id) = next {
            if !visited.insert(id) {
                break;
            }
            match self.objects.get(&id) {
                Some(obj) => {
                    chain.push(obj);
                    next = obj.prototype;
                }
                None => break,
            }
        }
        chain
    }
}

impl ObjectGraph for HeapSnapshot {
    type Value = SnapshotValue;

    fn kind(&self, value: &SnapshotValue) -> ValueKind {
        match self.object(value) {
            Some(obj) => match obj.kind {
                ObjectKind::Object => ValueKind::Object,
                ObjectKind::Function => ValueKind::Function,
            },
            None => {
                if let SnapshotValue::Object(id) = value {
                    trace!("Dangling reference to object {}", id);
                }
                ValueKind::Primitive
            }
        }
    }

    fn property_names(&self, value: &SnapshotValue) -> Vec<String> {
        let Some(obj) = self.object(value) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for link in self.chain(obj) {
            for prop in &link.properties {
                if seen.insert(prop.name.as_str()) {
                    names.push(prop.name.clone());
                }
            }
        }
        names
    }

    fn accessors(&self, value: &SnapshotValue) -> Vec<Accessor<SnapshotValue>> {
        let Some(obj) = self.object(value) else {
            return Vec::new();
        };
        obj.accessors
            .iter()
            .map(|a| Accessor {
                name: a.name.clone(),
                getter: a.get.map(SnapshotValue::Object),
                setter: a.set.map(SnapshotValue::Object),
            })
            .collect()
    }

    fn get(&self, value: &SnapshotValue, key: &str) -> std::result::Result<SnapshotValue, AccessError> {
        let obj = self
            .object(value)
            .ok_or_else(|| AccessError::Missing(key.to_string()))?;
        for link in self.chain(obj) {
            if let Some(prop) = link.properties.iter().find(|p| p.name == key) {
                if prop.throws {
                    return Err(AccessError::Threw(key.to_string()));
                }
                return Ok(self.to_value(prop.target));
            }
        }
        Err(AccessError::Missing(key.to_string()))
    }
}

impl Introspector for HeapSnapshot {
    fn identity_of(&self, value: &SnapshotValue) -> ObjectId {
        match self.object(value) {
            Some(obj) => ObjectId(obj.identity.unwrap_or(obj.id)),
            None => ObjectId(0),
        }
    }

    fn native_link_of(&self, value: &SnapshotValue) -> Option<NativeLink> {
        let native = self.object(value)?.native.as_ref()?;
        Some(NativeLink {
            callback: native.callback.0,
            overloads: native.overloads.iter().map(|a| a.0).collect(),
        })
    }

    fn diagnostic_text(&self, value: &SnapshotValue) -> Option<String> {
        self.object(value)?.diagnostic.clone()
    }

    fn diagnostic_text_at(&self, address: u64) -> Option<String> {
        self.addresses.get(&address).cloned()
    }

    fn extract_trampoline_target(&self, value: &SnapshotValue, kind: TrampolineKind) -> Option<u64> {
        let t = &self.object(value)?.trampolines;
        let addr = match kind {
            TrampolineKind::FunctionCallbackInvoke => t.function_callback_invoke,
            TrampolineKind::NanImplementation => t.nan,
            TrampolineKind::NapiCallbackData => t.napi,
        };
        addr.map(u64::from)
    }

    fn extract_embedded_descriptor(&self, value: &SnapshotValue) -> Option<String> {
        self.object(value)?.descriptor.clone()
    }
}

impl ModuleHost for HeapSnapshot {
    fn load_module(&self, path: &Path) -> Result<SnapshotValue> {
        let key = path.display().to_string();
        let root = self.modules.get(&key).copied().or_else(|| {
            // 正規化したパスでも照合する
            let canonical = fs::canonicalize(path).ok()?;
            self.modules
                .iter()
                .find(|(k, _)| fs::canonicalize(k).ok().as_ref() == Some(&canonical))
                .map(|(_, id)| *id)
        });
        match root {
            Some(id) if self.objects.contains_key(&id) => {
                debug!("Loaded module {} (root object {})", key, id);
                Ok(SnapshotValue::Object(id))
            }
            Some(id) => Err(anyhow::anyhow!(
                "Module {} refers to missing root object {}",
                key,
                id
            )),
            None => Err(anyhow::anyhow!("Module {} is not present in the snapshot", key)),
        }
    }
}
