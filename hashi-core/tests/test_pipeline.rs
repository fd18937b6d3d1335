//! ネイティブ経路とWASM経路のパイプライン全体のテスト

use hashi_core::{
    scan_native, scan_wasm, BridgeClassifier, FailureReason, NativeAnalyzer, ResultAggregator,
    ScanConfig, WalkMode,
};
use hashi_symbols::{AddressSymbolizer, SymbolTable};
use hashi_target::HeapSnapshot;
use hashi_wasm::ExportLister;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const INVOKE: &str = "_ZN6v8impl12_GLOBAL__N_123FunctionCallbackWrapper6InvokeERKN2v820FunctionCallbackInfoINS2_5ValueEEE";
const CONSTRUCTOR_WRAPPER: &str =
    "_ZN4Napi10ObjectWrapI3FooE26ConstructorCallbackWrapperEP10napi_env__P20napi_callback_info__";

/// 固定の応答を返すシンボライザ
struct CannedSymbolizer {
    entries: HashMap<u64, (&'static str, &'static str)>,
    batches: RefCell<Vec<BTreeSet<u64>>>,
}

impl CannedSymbolizer {
    fn new(entries: &[(u64, &'static str, &'static str)]) -> Self {
        Self {
            entries: entries.iter().map(|&(a, s, l)| (a, (s, l))).collect(),
            batches: RefCell::new(Vec::new()),
        }
    }

    fn batches(&self) -> Vec<BTreeSet<u64>> {
        self.batches.borrow().clone()
    }
}

impl AddressSymbolizer for CannedSymbolizer {
    fn resolve(&self, addresses: &BTreeSet<u64>) -> hashi_symbols::Result<SymbolTable> {
        self.batches.borrow_mut().push(addresses.clone());
        let mut table = SymbolTable::new();
        for address in addresses {
            if let Some((symbol, library)) = self.entries.get(address) {
                table.insert(*address, *symbol, *library);
            }
        }
        Ok(table)
    }
}

struct BrokenSymbolizer;

impl AddressSymbolizer for BrokenSymbolizer {
    fn resolve(&self, _addresses: &BTreeSet<u64>) -> hashi_symbols::Result<SymbolTable> {
        Err(anyhow::anyhow!("gdb: command not found"))
    }
}

fn analyze(snapshot: Value, symbolizer: &impl AddressSymbolizer) -> hashi_core::Report {
    let host = HeapSnapshot::from_value(snapshot).unwrap();
    let classifier = BridgeClassifier::new().unwrap();
    let analyzer = NativeAnalyzer::new(&host, symbolizer, &classifier);
    let mut agg = ResultAggregator::new();
    analyzer.analyze("/pkg/index.node", "pkg/index", host.value(1), &mut agg);
    agg.finish(Duration::ZERO)
}

#[test]
fn test_constructor_wrapper_bridge() {
    let symbolizer = CannedSymbolizer::new(&[
        (0x1000, INVOKE, "/usr/bin/node"),
        (0x2000, CONSTRUCTOR_WRAPPER, "/path/libfoo.so"),
    ]);
    let report = analyze(
        json!({
            "objects": [
                {"id": 1, "properties": [{"name": "add", "ref": 2}]},
                {"id": 2, "kind": "function",
                 "native": {"callback": "0x1000"},
                 "trampolines": {"function_callback_invoke": "0x2000"}}
            ]
        }),
        &symbolizer,
    );

    let bridges = serde_json::to_value(&report.bridges).unwrap();
    assert_eq!(
        bridges,
        json!([{"jsname": "pkg/index.add", "cfunc": "Foo::Foo", "library": "/path/libfoo.so"}])
    );
    assert_eq!(report.jump_libs, vec!["/path/libfoo.so"]);
    assert!(report.failed.is_empty());
    // 最終段のバッチは空なので起動しない
    assert_eq!(symbolizer.batches().len(), 2);
}

#[test]
fn test_null_callback_is_ledgered() {
    let symbolizer = CannedSymbolizer::new(&[]);
    let report = analyze(
        json!({
            "objects": [
                {"id": 1, "properties": [{"name": "fn", "ref": 2}]},
                {"id": 2, "kind": "function", "native": {"callback": 0}}
            ]
        }),
        &symbolizer,
    );

    assert!(report.bridges.is_empty());
    assert_eq!(report.failed["pkg/index.fn"], FailureReason::NullCallback);
    assert_eq!(report.foreign_callable_objects, 1);
    assert!(symbolizer.batches().is_empty());
}

#[test]
fn test_three_waves_and_missing_addresses() {
    let symbolizer = CannedSymbolizer::new(&[
        (0x1000, INVOKE, "/usr/bin/node"),
        (0x2000, "_ZN4Napi12InstanceWrapI3BarE21InstanceMethodCallbackEv", "/lib/libbar.so"),
        (0x3000, "_ZN3Bar4sizeEv", "/lib/libbar.so"),
        (0x4000, "_Z3addii", "/lib/libmath.so"),
        (0x5000, "_Z3adddd", "/lib/libmath.so"),
    ]);
    let report = analyze(
        json!({
            "objects": [
                {"id": 1, "properties": [
                    {"name": "size", "ref": 2},
                    {"name": "add", "ref": 3},
                    {"name": "lost", "ref": 4}
                ]},
                {"id": 2, "kind": "function",
                 "native": {"callback": "0x1000"},
                 "trampolines": {"function_callback_invoke": "0x2000", "napi": "0x3000"}},
                {"id": 3, "kind": "function",
                 "native": {"callback": "0x4000", "overloads": ["0x5000", "0x6000"]}},
                {"id": 4, "kind": "function", "native": {"callback": "0x7000"}}
            ]
        }),
        &symbolizer,
    );

    let batches = symbolizer.batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0], BTreeSet::from([0x1000, 0x4000, 0x5000, 0x6000, 0x7000]));
    assert_eq!(batches[1], BTreeSet::from([0x2000]));
    assert_eq!(batches[2], BTreeSet::from([0x3000, 0x4000]));

    let pairs: Vec<(&str, &str)> = report
        .bridges
        .iter()
        .map(|b| (b.jsname.as_str(), b.cfunc.as_str()))
        .collect();
    assert!(pairs.contains(&("pkg/index.add", "add(double, double)")));
    assert!(pairs.contains(&("pkg/index.add", "add(int, int)")));
    assert!(pairs.contains(&("pkg/index.size", "Bar::size()")));
    assert!(!pairs.iter().any(|(jsname, _)| *jsname == "pkg/index.lost"));

    assert_eq!(report.failed["pkg/index.add"], FailureReason::OverloadResolutionFail);
    assert_eq!(report.failed["pkg/index.lost"], FailureReason::CfuncAddressResolutionFail);
    assert_eq!(report.jump_libs, vec!["/lib/libmath.so", "/lib/libbar.so"]);
    for bridge in &report.bridges {
        assert!(report.jump_libs.contains(&bridge.library));
    }
}

#[test]
fn test_later_wave_misses_are_ledgered() {
    let symbolizer = CannedSymbolizer::new(&[
        (0x1000, INVOKE, "/usr/bin/node"),
        (0x2000, "_ZN4Napi12InstanceWrapI3BarE21InstanceMethodCallbackEv", "/lib/libbar.so"),
    ]);
    let report = analyze(
        json!({
            "objects": [
                {"id": 1, "properties": [
                    {"name": "forwarded", "ref": 2},
                    {"name": "extracted", "ref": 3}
                ]},
                // 転送先 0x2100 は応答にない
                {"id": 2, "kind": "function",
                 "native": {"callback": "0x1000"},
                 "trampolines": {"function_callback_invoke": "0x2100"}},
                // 転送先は解決できるが、取り出した入口 0x3100 は応答にない
                {"id": 3, "kind": "function",
                 "native": {"callback": "0x1000"},
                 "trampolines": {"function_callback_invoke": "0x2000", "napi": "0x3100"}}
            ]
        }),
        &symbolizer,
    );

    let batches = symbolizer.batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[1], BTreeSet::from([0x2000, 0x2100]));
    assert_eq!(batches[2], BTreeSet::from([0x3100]));

    assert!(report.bridges.is_empty());
    assert!(report.jump_libs.is_empty());
    assert_eq!(report.failed["pkg/index.forwarded"], FailureReason::CfuncAddressResolutionFail);
    assert_eq!(report.failed["pkg/index.extracted"], FailureReason::CfuncAddressResolutionFail);
}

#[test]
fn test_symbolizer_failure_is_not_fatal() {
    let report = analyze(
        json!({
            "objects": [
                {"id": 1, "properties": [{"name": "add", "ref": 2}]},
                {"id": 2, "kind": "function", "native": {"callback": "0x4000"}}
            ]
        }),
        &BrokenSymbolizer,
    );
    assert!(report.bridges.is_empty());
    assert_eq!(report.failed["pkg/index.add"], FailureReason::CfuncAddressResolutionFail);
}

#[test]
fn test_shared_native_object_reported_once() {
    let symbolizer = CannedSymbolizer::new(&[(0x4000, "_Z3addii", "/lib/libmath.so")]);
    let report = analyze(
        json!({
            "objects": [
                {"id": 1, "properties": [
                    {"name": "b", "ref": 3},
                    {"name": "a", "ref": 2}
                ]},
                {"id": 2, "properties": [{"name": "add", "ref": 4}]},
                {"id": 3, "properties": [{"name": "add", "ref": 4}]},
                {"id": 4, "kind": "function", "native": {"callback": "0x4000"}}
            ]
        }),
        &symbolizer,
    );
    assert_eq!(report.bridges.len(), 1);
    assert_eq!(report.bridges[0].jsname, "pkg/index.b.add");
}

fn write_file(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"").unwrap();
}

#[test]
fn test_scan_native_package() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("pkg");
    write_file(&root.join("index.node"));
    write_file(&root.join("broken.node"));
    let root = fs::canonicalize(&root).unwrap();
    let index = root.join("index.node").display().to_string();

    let host = HeapSnapshot::from_value(json!({
        "pid": 4242,
        "modules": {index.clone(): 1},
        "objects": [
            {"id": 1, "properties": [{"name": "add", "ref": 2}]},
            {"id": 2, "kind": "function",
             "native": {"callback": "0x1000"},
             "trampolines": {"function_callback_invoke": "0x2000"}}
        ]
    }))
    .unwrap();
    let symbolizer = CannedSymbolizer::new(&[
        (0x1000, INVOKE, "/usr/bin/node"),
        (0x2000, CONSTRUCTOR_WRAPPER, "/path/libfoo.so"),
    ]);
    let classifier = BridgeClassifier::new().unwrap();

    let report = scan_native(&host, &symbolizer, &classifier, &ScanConfig::new(&root)).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["count"], 1);
    assert_eq!(json["bridges"][0]["jsname"], "pkg/index.add");
    assert_eq!(json["bridges"][0]["cfunc"], "Foo::Foo");
    assert_eq!(json["failed"]["pkg/broken"], "MODULE_LOAD_FAIL");
    assert_eq!(json["modules"].as_array().unwrap().len(), 2);
    assert_eq!(json["foreign_callable_objects"], 1);
    assert!(json.get("ambiguous").is_none());
}

struct CannedLister(HashMap<PathBuf, String>);

impl ExportLister for CannedLister {
    fn list_exports(&self, file: &Path) -> hashi_wasm::Result<String> {
        self.0
            .get(file)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("wasm-objdump failed on {:?}", file))
    }
}

#[test]
fn test_scan_wasm_package() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("pkg");
    write_file(&root.join("index.js"));
    write_file(&root.join("math.wasm"));
    write_file(&root.join("math_full.wasm"));
    let root = fs::canonicalize(&root).unwrap();

    let lister = CannedLister(HashMap::from([
        (
            root.join("math.wasm"),
            " - func[0] <math_add> -> \"add\"\n - func[1] <math_sub> -> \"sub\"\n".to_string(),
        ),
        (
            root.join("math_full.wasm"),
            " - func[0] <full_add> -> \"add\"\n - func[1] <full_sub> -> \"sub\"\n - func[2] <full_mul> -> \"mul\"\n"
                .to_string(),
        ),
    ]));

    let exports = "0x2000: [JSObject]\n\
                   \x20   #add: 0x3001 <JSFunction js-to-wasm:ii:i (sfi = 0x4001)>\n\
                   \x20   #sub: 0x3002 <JSFunction js-to-wasm:ii:i (sfi = 0x4002)>\n";
    let host = HeapSnapshot::from_value(json!({
        "modules": {root.join("index.js").display().to_string(): 1},
        "objects": [
            {"id": 1, "properties": [
                {"name": "add", "ref": 2},
                {"name": "sub", "ref": 3},
                {"name": "div", "ref": 4},
                {"name": "helper", "ref": 5}
            ]},
            {"id": 2, "kind": "function", "identity": 9,
             "diagnostic": " - Wasm instance: 0x1000\n - Wasm function index: 0\n"},
            {"id": 3, "kind": "function", "identity": 9,
             "diagnostic": " - Wasm instance: 0x1000\n - Wasm function index: 1\n"},
            {"id": 4, "kind": "function",
             "diagnostic": " - Wasm instance: 0x1000\n - Wasm function index: 7\n"},
            {"id": 5, "kind": "function"}
        ],
        "addresses": {
            "0x1000": " - exports_object: 0x2000\n",
            "0x2000": exports
        }
    }))
    .unwrap();

    let config = ScanConfig::new(&root).with_mode(WalkMode::Wasm);
    let report = scan_wasm(&host, &lister, &config).unwrap();
    let math = root.join("math.wasm").display().to_string();

    let pairs: Vec<(&str, &str, &str)> = report
        .bridges
        .iter()
        .map(|b| (b.jsname.as_str(), b.cfunc.as_str(), b.library.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("pkg/index.add", "math_add", math.as_str()),
            ("pkg/index.sub", "math_sub", math.as_str()),
        ]
    );
    assert_eq!(report.modules, vec![root.join("index.js").display().to_string()]);
    assert_eq!(report.foreign_callable_objects, 3);
    assert_eq!(report.failed["pkg/index.div"], FailureReason::WasmUnresolved);

    let unresolved = report.unresolved.unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].idx, 7);
    assert_eq!(unresolved[0].reason.as_deref(), Some("index not in file"));
    assert_eq!(report.ambiguous, Some(Vec::new()));
}
