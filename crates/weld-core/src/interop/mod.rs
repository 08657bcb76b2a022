//! CommonJS/ESM interop and export-shape analysis.
//!
//! - [`condition`]: static evaluation of branch conditions against `define`.
//! - [`shape`]: export shapes, proven CommonJS re-exports, import bindings.
//! - [`treeshake`]: statically unused exports.

pub mod condition;
pub mod shape;
pub mod treeshake;

pub use condition::Defines;
pub use shape::{analyze, Binding, CjsReexport, ExportShape, InteropAnalysis};
pub use treeshake::{UnusedExports, UsedExports};
