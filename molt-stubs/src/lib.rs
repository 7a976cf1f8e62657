#![forbid(unsafe_code)]

mod builtin;
mod metadata;
mod registry;

pub use metadata::{
    expand_template, parse_stub_package, parse_type_str, ty_from_surface, CrateRequirement,
    FunctionMapping, MethodMapping, StubError, StubPackage, TypeMapping,
};
pub use registry::StubRegistry;
