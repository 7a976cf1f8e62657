#![forbid(unsafe_code)]

use std::fmt;

use serde::Serialize;

/// The closed type universe of the typed IR.
///
/// Every type an accepted program can mention lowers into one of these
/// constructors. `Unknown` exists only while inference is running; a node
/// that still types as `Unknown` after analysis is a fatal diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Ty {
    Bool,
    Int,
    Float,
    Unit,
    Never,
    /// Borrowed string data, used at pure read sites.
    Str,
    /// Owned string data, used at binding, argument, and return boundaries.
    String,
    List(Box<Ty>),
    Map(Box<Ty>, Box<Ty>),
    Set(Box<Ty>),
    Tuple(Vec<Ty>),
    Option(Box<Ty>),
    Result(Box<Ty>, Box<Ty>),
    /// User- or stub-defined nominal type.
    Named { path: String, args: Vec<Ty> },
    Function {
        params: Vec<Ty>,
        ret: Box<Ty>,
        is_async: bool,
    },
    /// Reference-counted shared ownership.
    Shared(Box<Ty>),
    /// Async-aware mutually-exclusive access.
    Guarded(Box<Ty>),
    Unknown,
}

impl Ty {
    pub fn list(elem: Ty) -> Ty {
        Ty::List(Box::new(elem))
    }

    pub fn map(key: Ty, value: Ty) -> Ty {
        Ty::Map(Box::new(key), Box::new(value))
    }

    pub fn set(elem: Ty) -> Ty {
        Ty::Set(Box::new(elem))
    }

    pub fn option(inner: Ty) -> Ty {
        Ty::Option(Box::new(inner))
    }

    pub fn result(ok: Ty, err: Ty) -> Ty {
        Ty::Result(Box::new(ok), Box::new(err))
    }

    pub fn shared(inner: Ty) -> Ty {
        Ty::Shared(Box::new(inner))
    }

    pub fn guarded(inner: Ty) -> Ty {
        Ty::Guarded(Box::new(inner))
    }

    pub fn named(path: impl Into<String>) -> Ty {
        Ty::Named {
            path: path.into(),
            args: Vec::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Ty::Unknown)
    }

    /// True when any constructor argument (at any depth) is `Unknown`.
    pub fn contains_unknown(&self) -> bool {
        match self {
            Ty::Unknown => true,
            Ty::List(t) | Ty::Set(t) | Ty::Option(t) | Ty::Shared(t) | Ty::Guarded(t) => {
                t.contains_unknown()
            }
            Ty::Map(k, v) | Ty::Result(k, v) => k.contains_unknown() || v.contains_unknown(),
            Ty::Tuple(ts) => ts.iter().any(Ty::contains_unknown),
            Ty::Named { args, .. } => args.iter().any(Ty::contains_unknown),
            Ty::Function { params, ret, .. } => {
                params.iter().any(Ty::contains_unknown) || ret.contains_unknown()
            }
            _ => false,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Ty::Bool | Ty::Int | Ty::Float | Ty::Unit | Ty::Never)
    }

    pub fn is_stringy(&self) -> bool {
        matches!(self, Ty::Str | Ty::String)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float)
    }
}

impl fmt::Display for Ty {
    /// Renders in surface-annotation syntax so diagnostics read like the
    /// code the user wrote.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Bool => write!(f, "bool"),
            Ty::Int => write!(f, "int"),
            Ty::Float => write!(f, "float"),
            Ty::Unit => write!(f, "None"),
            Ty::Never => write!(f, "Never"),
            Ty::Str | Ty::String => write!(f, "str"),
            Ty::List(t) => write!(f, "list[{t}]"),
            Ty::Map(k, v) => write!(f, "dict[{k}, {v}]"),
            Ty::Set(t) => write!(f, "set[{t}]"),
            Ty::Tuple(ts) => {
                write!(f, "tuple[")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
            Ty::Option(t) => write!(f, "Optional[{t}]"),
            Ty::Result(ok, err) => write!(f, "Result[{ok}, {err}]"),
            Ty::Named { path, args } => {
                write!(f, "{path}")?;
                if !args.is_empty() {
                    write!(f, "[")?;
                    for (i, t) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{t}")?;
                    }
                    write!(f, "]")?;
                }
                Ok(())
            }
            Ty::Function { params, ret, is_async } => {
                if *is_async {
                    write!(f, "async ")?;
                }
                write!(f, "(")?;
                for (i, t) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ") -> {ret}")
            }
            Ty::Shared(t) => write!(f, "Arc[{t}]"),
            Ty::Guarded(t) => write!(f, "Mutex[{t}]"),
            Ty::Unknown => write!(f, "<unknown>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_surface_syntax() {
        let t = Ty::result(Ty::Int, Ty::String);
        assert_eq!(t.to_string(), "Result[int, str]");
        assert_eq!(Ty::list(Ty::option(Ty::Int)).to_string(), "list[Optional[int]]");
    }

    #[test]
    fn contains_unknown_descends() {
        assert!(Ty::list(Ty::Unknown).contains_unknown());
        assert!(Ty::map(Ty::String, Ty::shared(Ty::Unknown)).contains_unknown());
        assert!(!Ty::result(Ty::Int, Ty::String).contains_unknown());
    }
}
