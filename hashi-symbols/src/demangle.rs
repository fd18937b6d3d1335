//! シンボル名のデマングル

use cpp_demangle::DemangleOptions;
use thiserror::Error;

/// デマングル失敗
///
/// マングルされた形式に見えるのにどのデマングラも受け付けなかった場合に返る。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to demangle symbol '{symbol}': {reason}")]
pub struct DemangleError {
    pub symbol: String,
    pub reason: String,
}

/// マングル名を可読な名前に変換する
pub trait Demangle {
    fn demangle(&self, symbol: &str) -> Result<String, DemangleError>;
}

/// Rust と C++ (Itanium ABI) を扱うデマングラ
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolDemangler;

impl SymbolDemangler {
    pub fn new() -> Self {
        Self
    }
}

impl Demangle for SymbolDemangler {
    fn demangle(&self, symbol: &str) -> Result<String, DemangleError> {
        // c++filt と同じく、マングルされていない名前はそのまま返す
        if !is_mangled(symbol) {
            return Ok(symbol.to_string());
        }

        if is_rust_symbol(symbol) {
            if let Ok(demangled) = rustc_demangle::try_demangle(symbol) {
                return Ok(format!("{:#}", demangled));
            }
        }

        let parsed = cpp_demangle::Symbol::new(symbol.as_bytes()).map_err(|e| DemangleError {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })?;
        parsed
            .demangle(&DemangleOptions::default())
            .map_err(|e| DemangleError {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })
    }
}

/// マングルされた名前かどうか
pub fn is_mangled(symbol: &str) -> bool {
    symbol.starts_with("_Z") || symbol.starts_with("__Z") || symbol.starts_with("_R")
}

/// Rust のシンボルかどうか（v0 形式、またはハッシュ付きの legacy 形式）
fn is_rust_symbol(symbol: &str) -> bool {
    if symbol.starts_with("_R") {
        return true;
    }
    // macOS では先頭に `_` が1つ余分に付く
    let body = symbol
        .strip_prefix('_')
        .filter(|rest| rest.starts_with("_ZN"))
        .unwrap_or(symbol);
    if !body.starts_with("_ZN") || !body.ends_with('E') {
        return false;
    }
    // 末尾は 17h<16桁の16進>E
    let trimmed = &body[..body.len() - 1];
    match trimmed.rfind("17h") {
        Some(pos) => {
            let hash = &trimmed[pos + 3..];
            hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}
