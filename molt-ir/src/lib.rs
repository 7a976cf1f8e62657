#![forbid(unsafe_code)]

mod ir;
mod ty;

pub use ir::{
    BinOp, ClassIr, ConstIr, ExprIr, ExprKind, FStrPart, FieldIr, FunctionIr, ImportIr, ModuleIr,
    NodeId, NodeIdGen, ParamIr, StmtIr, StmtKind, UnaryOp,
};
pub use ty::Ty;
