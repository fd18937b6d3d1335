//! 診断テキストの解析
//!
//! エンジンのデバッグ出力から、WASM 関数インデックス、インスタンスアドレス、
//! エクスポートオブジェクトのアドレス、エクスポート名を取り出します。

use crate::Result;
use hashi_symbols::Address;
use regex::Regex;
use std::collections::HashSet;

/// 診断テキストのパーサ
pub struct DiagnosticParser {
    function_index: Regex,
    instance: Regex,
    exports_object: Regex,
    export_name: Regex,
}

impl DiagnosticParser {
    pub fn new() -> Result<Self> {
        // 例: " - Wasm function index: 12"
        let function_index = Regex::new(r"-\s*Wasm function index:\s*(\d+)")?;
        // 例: " - Wasm instance: 0x3a5c08e01234"
        let instance = Regex::new(r"-\s*Wasm instance:\s*(0x[0-9a-fA-F]+)")?;
        let exports_object = Regex::new(r"-\s*exports_object:\s*(0x[0-9a-fA-F]+)")?;
        // 例: "    #add: 0x... <JSFunction js-to-wasm:i:i (sfi = 0x...)>"
        let export_name = Regex::new(r"#([^:\s]+)\s*:")?;

        Ok(Self {
            function_index,
            instance,
            exports_object,
            export_name,
        })
    }

    /// WASM 関数のインデックス。WASM 由来でなければ None
    pub fn wasm_function_index(&self, text: &str) -> Option<u32> {
        self.function_index.captures(text)?[1].parse().ok()
    }

    pub fn wasm_instance_address(&self, text: &str) -> Option<u64> {
        self.instance.captures(text)?[1].parse::<Address>().ok().map(u64::from)
    }

    pub fn exports_object_address(&self, text: &str) -> Option<u64> {
        self.exports_object.captures(text)?[1].parse::<Address>().ok().map(u64::from)
    }

    /// エクスポートオブジェクトの診断テキストから、JS から見える名前を出現順に取り出す
    pub fn export_names(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for line in text.lines().filter(|l| l.contains("js-to-wasm")) {
            if let Some(caps) = self.export_name.captures(line) {
                let name = caps[1].to_string();
                if seen.insert(name.clone()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// WASM 由来の値を示すテキストかどうか
    pub fn mentions_wasm(text: &str) -> bool {
        text.to_ascii_lowercase().contains("wasm")
    }
}

impl Default for DiagnosticParser {
    fn default() -> Self {
        Self::new().expect("Failed to create DiagnosticParser")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUNCTION_TEXT: &str = "0x2f6c0b8c1e1: [Function] in OldSpace\n \
        - map: 0x1a2b <Map[32](HOLEY_ELEMENTS)>\n \
        - Wasm instance: 0x3a5c08e01234\n \
        - Wasm function index: 7\n";

    const EXPORTS_TEXT: &str = "0x3a5c08e05678: [JS_OBJECT_TYPE]\n \
        - properties: {\n    \
        #memory: 0x01 <Memory map = 0x02> (const data field 0)\n    \
        #add: 0x03 <JSFunction js-to-wasm:ii:i (sfi = 0x04)> (const data field 1)\n    \
        #sub: 0x05 <JSFunction js-to-wasm:ii:i (sfi = 0x06)> (const data field 2)\n    \
        #add: 0x03 <JSFunction js-to-wasm:ii:i (sfi = 0x04)> (const data field 3)\n \
        }\n";

    #[test]
    fn test_function_fields() {
        let parser = DiagnosticParser::new().unwrap();
        assert_eq!(parser.wasm_function_index(FUNCTION_TEXT), Some(7));
        assert_eq!(parser.wasm_instance_address(FUNCTION_TEXT), Some(0x3a5c08e01234));
        assert_eq!(parser.wasm_function_index("- kind: normal function"), None);
    }

    #[test]
    fn test_exports_object_address() {
        let parser = DiagnosticParser::new().unwrap();
        let text = "0x3a5c08e01234: [WasmInstanceObject]\n - exports_object: 0x3a5c08e05678 <Object map = 0x9>\n";
        assert_eq!(parser.exports_object_address(text), Some(0x3a5c08e05678));
    }

    #[test]
    fn test_export_names_skip_non_functions_and_dedup() {
        let parser = DiagnosticParser::new().unwrap();
        assert_eq!(parser.export_names(EXPORTS_TEXT), vec!["add", "sub"]);
    }

    #[test]
    fn test_mentions_wasm() {
        assert!(DiagnosticParser::mentions_wasm(FUNCTION_TEXT));
        assert!(DiagnosticParser::mentions_wasm("<JSFunction js-to-wasm:i>"));
        assert!(!DiagnosticParser::mentions_wasm("<JSFunction add>"));
    }
}
