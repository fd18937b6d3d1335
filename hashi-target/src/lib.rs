//! Hashi ターゲット内省
//!
//! このクレートは、解析対象ランタイムの値の木と内部表現に問い合わせるためのインタフェースを提供します。
//! プロパティ列挙、エンジン識別子、ネイティブコールバック、診断テキストの解析、
//! およびヒープスナップショットによる実装を含みます。

pub mod diagnostic;
pub mod graph;
pub mod introspect;
pub mod snapshot;

pub use diagnostic::DiagnosticParser;
pub use graph::{AccessError, Accessor, ObjectGraph, ObjectId, ValueKind};
pub use introspect::{Introspector, ModuleHost, NativeLink, TrampolineKind};
pub use snapshot::{HeapSnapshot, SnapshotValue};

/// ターゲット内省の結果型
pub type Result<T> = anyhow::Result<T>;
