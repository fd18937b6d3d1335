//! Hashi シンボル解決
//!
//! このクレートは、実行中プロセスのアドレスをシンボル名と所属ライブラリに解決する機能を提供します。
//! アドレス表現の正規化、デマングル、外部シンボライザとのバッチ交換などを行います。

pub mod address;
pub mod demangle;
pub mod gdb;
pub mod process;
pub mod script;
pub mod symbols;

pub use address::{canonical, Address};
pub use demangle::{Demangle, DemangleError, SymbolDemangler};
pub use gdb::{GdbLineParser, GdbSymbolizer};
pub use process::{run_captured, CapturedOutput};
pub use script::ScriptSymbolizer;
pub use symbols::{AddressSymbolizer, ResolvedSymbol, ResponseEntry, SymbolTable};

/// シンボル解決の結果型
pub type Result<T> = anyhow::Result<T>;
