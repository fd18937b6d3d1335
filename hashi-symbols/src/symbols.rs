//! アドレス→シンボル解決の結果とシンボライザのインタフェース

use crate::address::Address;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// 解決済みシンボル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub address: u64,
    /// シンボル名（マングルされている場合がある）
    pub symbol: String,
    /// シンボルを含むライブラリのパス
    pub library: String,
}

/// 応答ファイルの1エントリ
///
/// 旧来のヘルパーは `cfunc` キーでシンボル名を書き出すため、両方を受け付ける。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEntry {
    #[serde(alias = "cfunc")]
    pub symbol: String,
    pub library: String,
}

/// 1回のバッチ解決の結果
///
/// 応答に含まれないアドレスは「未解決」を意味し、エラーではない。
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: BTreeMap<u64, ResolvedSymbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解決結果を登録する
    pub fn insert(&mut self, address: u64, symbol: impl Into<String>, library: impl Into<String>) {
        self.entries.insert(
            address,
            ResolvedSymbol {
                address,
                symbol: symbol.into(),
                library: library.into(),
            },
        );
    }

    /// 応答マップから構築する
    ///
    /// キーは10進/16進のどちらでもよく、パースできないキーは警告して捨てる。
    pub fn from_response(response: HashMap<String, ResponseEntry>) -> Self {
        let mut table = Self::new();
        for (key, entry) in response {
            match key.parse::<Address>() {
                Ok(addr) => table.insert(addr.0, entry.symbol, entry.library),
                Err(e) => warn!("Dropping symbolizer entry with bad key: {}", e),
            }
        }
        table
    }

    /// 応答ファイルの形式に変換する（キーは10進文字列）
    pub fn to_response(&self) -> BTreeMap<Address, ResponseEntry> {
        self.entries
            .values()
            .map(|s| {
                (
                    Address(s.address),
                    ResponseEntry {
                        symbol: s.symbol.clone(),
                        library: s.library.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn get(&self, address: u64) -> Option<&ResolvedSymbol> {
        self.entries.get(&address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedSymbol> {
        self.entries.values()
    }
}

/// アドレスのバッチをシンボルに解決する外部コラボレータ
///
/// 実装は部分的な解決を許容しなければならない。
pub trait AddressSymbolizer {
    fn resolve(&self, addresses: &BTreeSet<u64>) -> Result<SymbolTable>;
}

impl<T: AddressSymbolizer + ?Sized> AddressSymbolizer for &T {
    fn resolve(&self, addresses: &BTreeSet<u64>) -> Result<SymbolTable> {
        (**self).resolve(addresses)
    }
}
