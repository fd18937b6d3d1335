//! バインディング規約の分類
//!
//! 解決済みシンボルの生テキストに対する部分文字列ルールで、
//! どのバインディング生成器のトランポリンかを判定します。
//! ルールは上から順に評価し、最初に一致したものを採用します。

use crate::report::FailureReason;
use crate::Result;
use hashi_symbols::{Demangle, ResolvedSymbol, SymbolDemangler};
use hashi_target::{Introspector, TrampolineKind};
use regex::Regex;
use tracing::{debug, warn};

/// 部分文字列ルール
///
/// `patterns` のいずれかの組について、組内のすべての部分文字列を含めば一致する。
#[derive(Debug, Clone, Copy)]
pub struct Rule<A> {
    pub name: &'static str,
    pub patterns: &'static [&'static [&'static str]],
    pub action: A,
}

impl<A: Copy> Rule<A> {
    pub fn matches(&self, symbol: &str) -> bool {
        self.patterns
            .iter()
            .any(|all| all.iter().all(|needle| symbol.contains(needle)))
    }
}

/// 最初に一致したルール
pub fn first_match<'r, A: Copy>(rules: &'r [Rule<A>], symbol: &str) -> Option<&'r Rule<A>> {
    rules.iter().find(|rule| rule.matches(symbol))
}

/// 1段目で一致したときの動作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstHopAction {
    /// 転送先を取り出して2段目の解決へ
    ExtractInvokeTarget,
    /// 実装関数を取り出して最終解決へ
    ExtractNanImplementation,
}

/// 1段目のルール（どれにも一致しなければ、そのアドレスが最終的な入口）
pub const FIRST_HOP_RULES: &[Rule<FirstHopAction>] = &[
    Rule {
        name: "function-callback-invoke",
        patterns: &[&["v8impl", "FunctionCallbackWrapper6Invoke"]],
        action: FirstHopAction::ExtractInvokeTarget,
    },
    Rule {
        name: "nan-implementation",
        patterns: &[&["Nan", "imp"]],
        action: FirstHopAction::ExtractNanImplementation,
    },
];

/// 2段目で一致したときの動作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondHopAction {
    /// テンプレート引数のクラス名からコンストラクタ名を合成する
    ConstructorWrapper,
    /// コールバックデータから本当の関数アドレスを取り出す
    NapiCallbackData,
    /// 関数に埋め込まれた記述子から名前を取り出す
    NeonDescriptor,
    /// デマングルした名前をそのまま使う
    DemangleDirect,
}

/// 2段目のルール（どれにも一致しなければ、そのアドレスが最終的な入口）
pub const SECOND_HOP_RULES: &[Rule<SecondHopAction>] = &[
    Rule {
        name: "objectwrap-constructor",
        patterns: &[&["Napi", "ObjectWrap", "ConstructorCallbackWrapper"]],
        action: SecondHopAction::ConstructorWrapper,
    },
    Rule {
        name: "napi-callback-data",
        patterns: &[
            &["Napi", "CallbackData", "Wrapper"],
            &["Napi", "InstanceWrap"],
            &["Napi", "ObjectWrap"],
        ],
        action: SecondHopAction::NapiCallbackData,
    },
    Rule {
        name: "neon",
        patterns: &[&["neon", "sys"]],
        action: SecondHopAction::NeonDescriptor,
    },
    Rule {
        name: "napi-rs-register",
        patterns: &[&["_napi_internal_register"]],
        action: SecondHopAction::DemangleDirect,
    },
    Rule {
        name: "napi-prefix",
        patterns: &[&["napi_"]],
        action: SecondHopAction::DemangleDirect,
    },
];

/// 1段目の判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstHopDecision {
    /// 2段目で解決するアドレス
    SecondHop(u64),
    /// 最終解決するアドレス
    Final(u64),
    Failed(FailureReason),
}

/// 2段目の判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondHopDecision {
    Bridge { cfunc: String, library: String },
    Final(u64),
    Failed(FailureReason),
}

/// 2段階のブリッジ分類器
pub struct BridgeClassifier<D: Demangle = SymbolDemangler> {
    demangler: D,
    /// デマングル後の最初のテンプレート引数
    template_arg: Regex,
    /// neon の記述子内の関数名
    neon_name: Regex,
}

impl BridgeClassifier<SymbolDemangler> {
    pub fn new() -> Result<Self> {
        Self::with_demangler(SymbolDemangler::new())
    }
}

impl Default for BridgeClassifier<SymbolDemangler> {
    fn default() -> Self {
        Self::new().expect("Failed to create BridgeClassifier")
    }
}

impl<D: Demangle> BridgeClassifier<D> {
    pub fn with_demangler(demangler: D) -> Result<Self> {
        Ok(Self {
            demangler,
            template_arg: Regex::new(r"<([^>]*)>")?,
            neon_name: Regex::new(r"#([^>]+)>")?,
        })
    }

    /// 1段目: 主コールバックのシンボルを分類する
    pub fn classify_first_hop<H: Introspector>(
        &self,
        host: &H,
        value: &H::Value,
        fqn: &str,
        resolved: &ResolvedSymbol,
    ) -> FirstHopDecision {
        let Some(rule) = first_match(FIRST_HOP_RULES, &resolved.symbol) else {
            return FirstHopDecision::Final(resolved.address);
        };
        debug!("{}: first hop matched {}", fqn, rule.name);

        match rule.action {
            FirstHopAction::ExtractInvokeTarget => {
                match host.extract_trampoline_target(value, TrampolineKind::FunctionCallbackInvoke) {
                    Some(address) => FirstHopDecision::SecondHop(address),
                    None => FirstHopDecision::Failed(FailureReason::ExtractFcbInvokeFail),
                }
            }
            FirstHopAction::ExtractNanImplementation => {
                match host.extract_trampoline_target(value, TrampolineKind::NanImplementation) {
                    Some(address) => FirstHopDecision::Final(address),
                    None => FirstHopDecision::Failed(FailureReason::ExtractNanFail),
                }
            }
        }
    }

    /// 2段目: 転送先のシンボルを分類する
    ///
    /// `module_file` は記述子から名前を得る生成器のライブラリとして使う。
    pub fn classify_second_hop<H: Introspector>(
        &self,
        host: &H,
        value: &H::Value,
        fqn: &str,
        resolved: &ResolvedSymbol,
        module_file: &str,
    ) -> SecondHopDecision {
        let Some(rule) = first_match(SECOND_HOP_RULES, &resolved.symbol) else {
            return SecondHopDecision::Final(resolved.address);
        };
        debug!("{}: second hop matched {}", fqn, rule.name);

        match rule.action {
            SecondHopAction::ConstructorWrapper => {
                let demangled = match self.demangle(fqn, &resolved.symbol) {
                    Ok(d) => d,
                    Err(reason) => return SecondHopDecision::Failed(reason),
                };
                match self.constructor_name(&demangled) {
                    Some(cfunc) => SecondHopDecision::Bridge {
                        cfunc,
                        library: resolved.library.clone(),
                    },
                    None => {
                        warn!("{}: no template argument in '{}'", fqn, demangled);
                        SecondHopDecision::Failed(FailureReason::ExtractNapiFail)
                    }
                }
            }
            SecondHopAction::NapiCallbackData => {
                match host.extract_trampoline_target(value, TrampolineKind::NapiCallbackData) {
                    Some(address) => SecondHopDecision::Final(address),
                    None => SecondHopDecision::Failed(FailureReason::ExtractNapiFail),
                }
            }
            SecondHopAction::NeonDescriptor => {
                let name = host
                    .extract_embedded_descriptor(value)
                    .and_then(|descriptor| self.neon_function_name(&descriptor));
                match name {
                    Some(cfunc) => SecondHopDecision::Bridge {
                        cfunc,
                        library: module_file.to_string(),
                    },
                    None => SecondHopDecision::Failed(FailureReason::NeonExtractionFail),
                }
            }
            SecondHopAction::DemangleDirect => match self.demangle(fqn, &resolved.symbol) {
                Ok(cfunc) => SecondHopDecision::Bridge {
                    cfunc,
                    library: resolved.library.clone(),
                },
                Err(reason) => SecondHopDecision::Failed(reason),
            },
        }
    }

    /// 最終段: 解決済みシンボルをデマングルする
    pub fn finalize(&self, fqn: &str, resolved: &ResolvedSymbol) -> std::result::Result<String, FailureReason> {
        self.demangle(fqn, &resolved.symbol)
    }

    /// `Napi::ObjectWrap<ns::Foo>::...` から `ns::Foo::Foo` を作る
    pub fn constructor_name(&self, demangled: &str) -> Option<String> {
        let class = self.template_arg.captures(demangled)?.get(1)?.as_str();
        if class.is_empty() {
            return None;
        }
        let last = class.rsplit("::").next().unwrap_or(class);
        Some(format!("{}::{}", class, last))
    }

    pub fn neon_function_name(&self, descriptor: &str) -> Option<String> {
        Some(self.neon_name.captures(descriptor)?[1].to_string())
    }

    fn demangle(&self, fqn: &str, symbol: &str) -> std::result::Result<String, FailureReason> {
        self.demangler.demangle(symbol).map_err(|e| {
            warn!("{}: {}", fqn, e);
            FailureReason::DemangleFail
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashi_target::HeapSnapshot;
    use serde_json::json;

    const CONSTRUCTOR_WRAPPER: &str =
        "_ZN4Napi10ObjectWrapI3FooE26ConstructorCallbackWrapperEP10napi_env__P20napi_callback_info__";

    fn resolved(address: u64, symbol: &str) -> ResolvedSymbol {
        ResolvedSymbol {
            address,
            symbol: symbol.to_string(),
            library: "/path/libfoo.so".to_string(),
        }
    }

    fn host() -> HeapSnapshot {
        HeapSnapshot::from_value(json!({
            "objects": [
                {"id": 1, "kind": "function",
                 "trampolines": {"function_callback_invoke": "0x2000", "nan": "0x3000", "napi": "0x4000"},
                 "descriptor": "<JSFunction #hello_world> (sfi = 0x5000)"},
                {"id": 2, "kind": "function"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_rule_matching() {
        let invoke = "_ZN6v8impl12_GLOBAL__N_123FunctionCallbackWrapper6InvokeERKN2v820FunctionCallbackInfoINS2_5ValueEEE";
        assert_eq!(
            first_match(FIRST_HOP_RULES, invoke).map(|r| r.action),
            Some(FirstHopAction::ExtractInvokeTarget)
        );
        assert_eq!(
            first_match(FIRST_HOP_RULES, "_ZN3Nan3imp23FunctionCallbackWrapperERKN2v820FunctionCallbackInfoE").map(|r| r.action),
            Some(FirstHopAction::ExtractNanImplementation)
        );
        assert!(first_match(FIRST_HOP_RULES, "_Z3addv").is_none());

        // コンストラクタ規約は汎用の ObjectWrap 規約より優先される
        assert_eq!(
            first_match(SECOND_HOP_RULES, CONSTRUCTOR_WRAPPER).map(|r| r.action),
            Some(SecondHopAction::ConstructorWrapper)
        );
        assert_eq!(
            first_match(SECOND_HOP_RULES, "_ZN4Napi12InstanceWrapI3BarE21InstanceMethodCallbackEv").map(|r| r.name),
            Some("napi-callback-data")
        );
        assert_eq!(
            first_match(SECOND_HOP_RULES, "_ZN4neon3sys3fun4callEv").map(|r| r.action),
            Some(SecondHopAction::NeonDescriptor)
        );
        assert_eq!(
            first_match(SECOND_HOP_RULES, "_ZN5hello27__napi_internal_register_fooEv").map(|r| r.name),
            Some("napi-rs-register")
        );
        assert_eq!(
            first_match(SECOND_HOP_RULES, "napi_sum_wrapper").map(|r| r.name),
            Some("napi-prefix")
        );
        assert!(first_match(SECOND_HOP_RULES, "_Z3addv").is_none());
    }

    #[test]
    fn test_invoke_trampoline_always_requests_second_hop() {
        let host = host();
        let classifier = BridgeClassifier::new().unwrap();
        let symbol = resolved(0x1000, "_ZN6v8impl12_GLOBAL__N_123FunctionCallbackWrapper6InvokeEv");

        assert_eq!(
            classifier.classify_first_hop(&host, &host.value(1), "pkg/index.add", &symbol),
            FirstHopDecision::SecondHop(0x2000)
        );
        assert_eq!(
            classifier.classify_first_hop(&host, &host.value(2), "pkg/index.add", &symbol),
            FirstHopDecision::Failed(FailureReason::ExtractFcbInvokeFail)
        );
    }

    #[test]
    fn test_first_hop_nan_and_default() {
        let host = host();
        let classifier = BridgeClassifier::new().unwrap();

        assert_eq!(
            classifier.classify_first_hop(&host, &host.value(1), "m.f", &resolved(0x1000, "_ZN3Nan3imp4callEv")),
            FirstHopDecision::Final(0x3000)
        );
        assert_eq!(
            classifier.classify_first_hop(&host, &host.value(2), "m.f", &resolved(0x1000, "_ZN3Nan3imp4callEv")),
            FirstHopDecision::Failed(FailureReason::ExtractNanFail)
        );
        assert_eq!(
            classifier.classify_first_hop(&host, &host.value(2), "m.f", &resolved(0x1000, "_Z3addv")),
            FirstHopDecision::Final(0x1000)
        );
    }

    #[test]
    fn test_constructor_wrapper_synthesizes_class_name() {
        let host = host();
        let classifier = BridgeClassifier::new().unwrap();

        assert_eq!(
            classifier.classify_second_hop(
                &host,
                &host.value(1),
                "pkg/index.add",
                &resolved(0x2000, CONSTRUCTOR_WRAPPER),
                "/pkg/build/Release/addon.node",
            ),
            SecondHopDecision::Bridge {
                cfunc: "Foo::Foo".to_string(),
                library: "/path/libfoo.so".to_string(),
            }
        );
        assert_eq!(
            classifier.constructor_name("Napi::ObjectWrap<ns::Foo>::ConstructorCallbackWrapper(napi_env__*)"),
            Some("ns::Foo::Foo".to_string())
        );
        assert_eq!(classifier.constructor_name("Napi::ObjectWrap::Ctor"), None);
    }

    #[test]
    fn test_second_hop_extractors() {
        let host = host();
        let classifier = BridgeClassifier::new().unwrap();
        let module = "/pkg/index.node";

        let napi = resolved(0x2000, "_ZN4Napi12InstanceWrapI3BarE21InstanceMethodCallbackEv");
        assert_eq!(
            classifier.classify_second_hop(&host, &host.value(1), "m.f", &napi, module),
            SecondHopDecision::Final(0x4000)
        );
        assert_eq!(
            classifier.classify_second_hop(&host, &host.value(2), "m.f", &napi, module),
            SecondHopDecision::Failed(FailureReason::ExtractNapiFail)
        );

        let neon = resolved(0x2000, "_ZN4neon3sys3fun4callEv");
        assert_eq!(
            classifier.classify_second_hop(&host, &host.value(1), "m.f", &neon, module),
            SecondHopDecision::Bridge {
                cfunc: "hello_world".to_string(),
                library: module.to_string(),
            }
        );
        assert_eq!(
            classifier.classify_second_hop(&host, &host.value(2), "m.f", &neon, module),
            SecondHopDecision::Failed(FailureReason::NeonExtractionFail)
        );

        let plain = resolved(0x2000, "_Z3addii");
        assert_eq!(
            classifier.classify_second_hop(&host, &host.value(2), "m.f", &plain, module),
            SecondHopDecision::Final(0x2000)
        );
    }

    struct RejectingDemangler;

    impl Demangle for RejectingDemangler {
        fn demangle(&self, symbol: &str) -> std::result::Result<String, hashi_symbols::DemangleError> {
            Err(hashi_symbols::DemangleError {
                symbol: symbol.to_string(),
                reason: "unexpected format".to_string(),
            })
        }
    }

    #[test]
    fn test_demangle_direct_and_failure() {
        let host = host();
        let classifier = BridgeClassifier::new().unwrap();

        assert_eq!(
            classifier.classify_second_hop(&host, &host.value(2), "m.f", &resolved(0x2000, "napi_sum"), "/m.node"),
            SecondHopDecision::Bridge {
                cfunc: "napi_sum".to_string(),
                library: "/path/libfoo.so".to_string(),
            }
        );
        assert_eq!(
            classifier.finalize("m.f", &resolved(0x2000, "_Z3addii")),
            Ok("add(int, int)".to_string())
        );

        let rejecting = BridgeClassifier::with_demangler(RejectingDemangler).unwrap();
        assert_eq!(
            rejecting.classify_second_hop(&host, &host.value(2), "m.f", &resolved(0x2000, "napi_sum"), "/m.node"),
            SecondHopDecision::Failed(FailureReason::DemangleFail)
        );
        assert_eq!(
            rejecting.finalize("m.f", &resolved(0x2000, "_Z3addii")),
            Err(FailureReason::DemangleFail)
        );
    }

    #[test]
    fn test_napi_rs_register_drops_rust_hash() {
        let host = host();
        let classifier = BridgeClassifier::new().unwrap();
        let register = resolved(0x2000, "_ZN5hello28__napi_internal_register_foo17h0123456789abcdefE");

        assert_eq!(
            classifier.classify_second_hop(&host, &host.value(2), "m.foo", &register, "/m.node"),
            SecondHopDecision::Bridge {
                cfunc: "hello::__napi_internal_register_foo".to_string(),
                library: "/path/libfoo.so".to_string(),
            }
        );
        assert_eq!(
            classifier.finalize("m.foo", &resolved(0x3000, "_ZN5hello3foo17hfedcba9876543210E")),
            Ok("hello::foo".to_string())
        );
    }
}
