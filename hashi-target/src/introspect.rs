//! ランタイム内部表現の問い合わせ
//!
//! 呼び出し可能オブジェクトのネイティブコールバック、診断テキスト、
//! 各バインディングフレームワーク専用の抽出器などを提供するインタフェースです。

use crate::graph::{ObjectGraph, ObjectId};
use crate::Result;
use std::path::Path;

/// ネイティブにディスパッチする関数の登録情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLink {
    /// 主コールバックのアドレス（0 は未登録）
    pub callback: u64,
    /// オーバーロードのアドレス
    pub overloads: Vec<u64>,
}

/// 2段目のアドレスを取り出す専用抽出器の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrampolineKind {
    /// エンジン生の FunctionCallbackWrapper::Invoke が転送する先
    FunctionCallbackInvoke,
    /// 旧来のネイティブ抽象化層の実装関数
    NanImplementation,
    /// オブジェクトラップのコールバックデータに格納された関数
    NapiCallbackData,
}

/// 実行中ランタイムの内省能力
///
/// 問い合わせはグラフ走査と同じ実行コンテキストから、幅優先の順序で発行すること。
pub trait Introspector: ObjectGraph {
    fn identity_of(&self, value: &Self::Value) -> ObjectId;

    /// ネイティブ関数でなければ None
    fn native_link_of(&self, value: &Self::Value) -> Option<NativeLink>;

    fn diagnostic_text(&self, value: &Self::Value) -> Option<String>;

    /// 生アドレスにあるオブジェクトの診断テキスト
    fn diagnostic_text_at(&self, address: u64) -> Option<String>;

    fn extract_trampoline_target(&self, value: &Self::Value, kind: TrampolineKind) -> Option<u64>;

    /// バインディング生成器が関数に埋め込んだ記述子文字列
    fn extract_embedded_descriptor(&self, value: &Self::Value) -> Option<String>;
}

/// モジュールファイルを読み込んでルート値を返すホスト
pub trait ModuleHost: Introspector {
    fn load_module(&self, path: &Path) -> Result<Self::Value>;
}
