#![forbid(unsafe_code)]

pub mod analyzer;
pub mod diagnostics;
pub mod lower;

pub use analyzer::{
    analyze_module, collect_exports, compatible, Analysis, ArgMode, ClassInfo, FnSig,
    MethodSig, ModuleExports,
};
pub use diagnostics::{line_col, Diagnostic, DiagnosticKind, DiagnosticSink};
pub use lower::lower_module;
