//! 値の木（オブジェクトグラフ）へのアクセス

use std::fmt;
use thiserror::Error;

/// エンジンレベルのオブジェクト識別子
///
/// 構造的な等価性ではなく、エンジンが同一オブジェクトとみなすかどうかを表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 値の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// オブジェクトでない値（降下しない）
    Primitive,
    Object,
    /// 呼び出し可能なオブジェクト
    Function,
}

impl ValueKind {
    pub fn is_object_like(self) -> bool {
        !matches!(self, ValueKind::Primitive)
    }
}

/// アクセサプロパティ（getter/setter の組）
#[derive(Debug, Clone)]
pub struct Accessor<V> {
    pub name: String,
    pub getter: Option<V>,
    pub setter: Option<V>,
}

/// プロパティアクセスの失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("property '{0}' threw on access")]
    Threw(String),
    #[error("property '{0}' not found")]
    Missing(String),
}

/// 値の木をたどるためのプロパティ列挙能力
pub trait ObjectGraph {
    type Value: Clone;

    fn kind(&self, value: &Self::Value) -> ValueKind;

    /// 自身とプロトタイプチェーン上のプロパティ名（列挙可能・不可の両方）
    ///
    /// 同名のプロパティは最初に現れたものだけを返す。
    fn property_names(&self, value: &Self::Value) -> Vec<String>;

    /// 自身が持つアクセサプロパティ
    fn accessors(&self, value: &Self::Value) -> Vec<Accessor<Self::Value>>;

    fn get(&self, value: &Self::Value, key: &str) -> Result<Self::Value, AccessError>;
}
