#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use miette::Diagnostic;
use molt_ir::Ty;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("stub package error: {message}")]
#[diagnostic(code(molt::stubs))]
pub struct StubError {
    pub message: String,
}

impl StubError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A build-manifest requirement contributed by a stub package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrateRequirement {
    pub name: String,
    pub version: String,
    pub features: BTreeSet<String>,
}

impl CrateRequirement {
    /// Merge another requirement for the same crate; features are unioned
    /// and the longer (more specific) version requirement wins.
    pub fn merge(&mut self, other: &CrateRequirement) {
        if other.version.len() > self.version.len() {
            self.version = other.version.clone();
        }
        self.features.extend(other.features.iter().cloned());
    }

    pub fn to_toml_line(&self) -> String {
        if self.features.is_empty() {
            format!("{} = \"{}\"", self.name, self.version)
        } else {
            let features = self
                .features
                .iter()
                .map(|f| format!("\"{f}\""))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "{} = {{ version = \"{}\", features = [{}] }}",
                self.name, self.version, features
            )
        }
    }
}

/// Replacement for a stubbed free function. The template is pure textual
/// substitution: `{argN}` by ordinal, `{args}` for the joined list.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionMapping {
    pub src: String,
    pub params: Vec<Ty>,
    /// SRC-visible result type. Fallible templates report the success type
    /// here and set `needs_result`.
    pub returns: Ty,
    pub rust_code: String,
    pub rust_imports: Vec<String>,
    pub needs_result: bool,
    /// For scoped-resource constructors: how a `with` target binds out of
    /// the acquired value. `{ctx}` names the guard binding.
    pub bind_template: Option<String>,
    pub package: String,
}

/// Replacement for a stubbed instance method; `{self}` names the receiver.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodMapping {
    pub receiver: String,
    pub method: String,
    pub params: Vec<Ty>,
    pub returns: Ty,
    pub rust_code: String,
    pub rust_imports: Vec<String>,
    pub needs_result: bool,
    pub mutates_receiver: bool,
    pub package: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeMapping {
    pub src: String,
    pub rust: String,
    pub package: String,
}

#[derive(Clone, Debug)]
pub struct StubPackage {
    pub name: String,
    pub rust_crate: String,
    pub rust_version: String,
    pub src_module: Option<String>,
    pub requirements: Vec<CrateRequirement>,
    pub functions: HashMap<String, FunctionMapping>,
    pub methods: HashMap<String, MethodMapping>,
    pub types: HashMap<String, TypeMapping>,
}

#[derive(Debug, Deserialize)]
struct RawStub {
    package: RawPackage,
    #[serde(default)]
    cargo: RawCargo,
    #[serde(default)]
    mappings: RawMappings,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    name: String,
    rust_crate: String,
    rust_version: String,
    #[serde(default)]
    src_module: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCargo {
    #[serde(default)]
    dependencies: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMappings {
    #[serde(default)]
    functions: Vec<RawFunction>,
    #[serde(default)]
    methods: Vec<RawMethod>,
    #[serde(default)]
    types: Vec<RawType>,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    src: String,
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    returns: Option<String>,
    rust_code: String,
    #[serde(default)]
    rust_imports: Vec<String>,
    #[serde(default)]
    needs_result: bool,
    #[serde(default)]
    bind_template: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMethod {
    /// `Type.method` form.
    src: String,
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    returns: Option<String>,
    rust_code: String,
    #[serde(default)]
    rust_imports: Vec<String>,
    #[serde(default)]
    needs_result: bool,
    #[serde(default)]
    mutates_receiver: bool,
}

#[derive(Debug, Deserialize)]
struct RawType {
    src: String,
    rust: String,
}

pub fn parse_stub_package(text: &str) -> Result<StubPackage, StubError> {
    let raw: RawStub = toml::from_str(text)
        .map_err(|e| StubError::new(format!("malformed stub package: {e}")))?;

    if raw.package.rust_version != "*" {
        semver::VersionReq::parse(&raw.package.rust_version).map_err(|e| {
            StubError::new(format!(
                "invalid rust_version '{}' in stub '{}': {e}",
                raw.package.rust_version, raw.package.name
            ))
        })?;
    }

    let mut requirements = Vec::new();
    for (dep, spec) in &raw.cargo.dependencies {
        requirements.push(requirement_from_value(dep, spec)?);
    }

    let pkg_name = raw.package.name.clone();

    let mut functions = HashMap::new();
    for f in raw.mappings.functions {
        let params = parse_ty_list(&f.params, &pkg_name)?;
        let returns = match &f.returns {
            Some(s) => parse_type_str(s)
                .map_err(|e| StubError::new(format!("in stub '{pkg_name}': {}", e.message)))?,
            None => Ty::Unit,
        };
        functions.insert(
            f.src.clone(),
            FunctionMapping {
                src: f.src,
                params,
                returns,
                rust_code: f.rust_code,
                rust_imports: f.rust_imports,
                needs_result: f.needs_result,
                bind_template: f.bind_template,
                package: pkg_name.clone(),
            },
        );
    }

    let mut methods = HashMap::new();
    for m in raw.mappings.methods {
        let Some((recv, method)) = m.src.split_once('.') else {
            return Err(StubError::new(format!(
                "method mapping '{}' in stub '{pkg_name}' must use the Type.method form",
                m.src
            )));
        };
        let params = parse_ty_list(&m.params, &pkg_name)?;
        let returns = match &m.returns {
            Some(s) => parse_type_str(s)
                .map_err(|e| StubError::new(format!("in stub '{pkg_name}': {}", e.message)))?,
            None => Ty::Unit,
        };
        methods.insert(
            m.src.clone(),
            MethodMapping {
                receiver: recv.to_string(),
                method: method.to_string(),
                params,
                returns,
                rust_code: m.rust_code,
                rust_imports: m.rust_imports,
                needs_result: m.needs_result,
                mutates_receiver: m.mutates_receiver,
                package: pkg_name.clone(),
            },
        );
    }

    let mut types = HashMap::new();
    for t in raw.mappings.types {
        types.insert(
            t.src.clone(),
            TypeMapping {
                src: t.src,
                rust: t.rust,
                package: pkg_name.clone(),
            },
        );
    }

    Ok(StubPackage {
        name: raw.package.name,
        rust_crate: raw.package.rust_crate,
        rust_version: raw.package.rust_version,
        src_module: raw.package.src_module,
        requirements,
        functions,
        methods,
        types,
    })
}

fn requirement_from_value(name: &str, spec: &toml::Value) -> Result<CrateRequirement, StubError> {
    match spec {
        toml::Value::String(version) => Ok(CrateRequirement {
            name: name.to_string(),
            version: version.clone(),
            features: BTreeSet::new(),
        }),
        toml::Value::Table(table) => {
            let version = table
                .get("version")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    StubError::new(format!("dependency '{name}' is missing a version"))
                })?
                .to_string();
            let mut features = BTreeSet::new();
            if let Some(toml::Value::Array(fs)) = table.get("features") {
                for f in fs {
                    if let Some(s) = f.as_str() {
                        features.insert(s.to_string());
                    }
                }
            }
            Ok(CrateRequirement {
                name: name.to_string(),
                version,
                features,
            })
        }
        _ => Err(StubError::new(format!(
            "dependency '{name}' must be a version string or a table"
        ))),
    }
}

fn parse_ty_list(raw: &[String], pkg: &str) -> Result<Vec<Ty>, StubError> {
    raw.iter()
        .map(|s| {
            parse_type_str(s)
                .map_err(|e| StubError::new(format!("in stub '{pkg}': {}", e.message)))
        })
        .collect()
}

/// Parse a type declaration string using the surface annotation
/// constructors, e.g. `Result[int, str]` or `tuple[Sender, Receiver]`.
pub fn parse_type_str(src: &str) -> Result<Ty, StubError> {
    let mut p = TyParser {
        src: src.as_bytes(),
        pos: 0,
    };
    let ty = p.parse_union()?;
    p.skip_ws();
    if p.pos != p.src.len() {
        return Err(StubError::new(format!(
            "trailing characters in type '{src}'"
        )));
    }
    Ok(ty)
}

struct TyParser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> TyParser<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn parse_union(&mut self) -> Result<Ty, StubError> {
        let first = self.parse_atom()?;
        if self.peek() != Some(b'|') {
            return Ok(first);
        }
        let mut variants = vec![first];
        while self.peek() == Some(b'|') {
            self.pos += 1;
            variants.push(self.parse_atom()?);
        }
        // `T | None` is the optional form; anything else is unsupported.
        let nones = variants.iter().filter(|t| **t == Ty::Unit).count();
        if nones == 1 && variants.len() == 2 {
            let inner = variants.into_iter().find(|t| *t != Ty::Unit);
            if let Some(inner) = inner {
                return Ok(Ty::option(inner));
            }
        }
        Err(StubError::new(
            "only `T | None` unions are supported in type declarations",
        ))
    }

    fn parse_atom(&mut self) -> Result<Ty, StubError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len()
            && (self.src[self.pos].is_ascii_alphanumeric()
                || self.src[self.pos] == b'_'
                || self.src[self.pos] == b'.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(StubError::new("expected a type name"));
        }
        let name = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| StubError::new("type names must be ascii"))?
            .to_string();

        let mut args = Vec::new();
        if self.peek() == Some(b'[') {
            self.pos += 1;
            loop {
                args.push(self.parse_union()?);
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                    }
                    Some(b']') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(StubError::new("expected ',' or ']' in type arguments")),
                }
            }
        }

        ty_from_surface(&name, args)
    }
}

/// Shared surface-name table: annotation names to type constructors.
pub fn ty_from_surface(name: &str, args: Vec<Ty>) -> Result<Ty, StubError> {
    let argc = args.len();
    let arity_err = move |want: usize| {
        StubError::new(format!(
            "type '{name}' expects {want} argument(s), got {argc}"
        ))
    };

    Ok(match name {
        "int" => Ty::Int,
        "float" => Ty::Float,
        "bool" => Ty::Bool,
        "str" => Ty::String,
        "None" => Ty::Unit,
        "list" | "List" | "Sequence" => {
            let mut args = args;
            match args.len() {
                1 => Ty::List(Box::new(args.remove(0))),
                _ => return Err(arity_err(1)),
            }
        }
        "dict" | "Dict" | "Mapping" => {
            let mut args = args;
            match args.len() {
                2 => {
                    let v = args.remove(1);
                    let k = args.remove(0);
                    Ty::map(k, v)
                }
                _ => return Err(arity_err(2)),
            }
        }
        "set" | "Set" | "FrozenSet" => {
            let mut args = args;
            match args.len() {
                1 => Ty::Set(Box::new(args.remove(0))),
                _ => return Err(arity_err(1)),
            }
        }
        "tuple" | "Tuple" => Ty::Tuple(args),
        "Optional" => {
            let mut args = args;
            match args.len() {
                1 => Ty::Option(Box::new(args.remove(0))),
                _ => return Err(arity_err(1)),
            }
        }
        "Result" => {
            let mut args = args;
            match args.len() {
                2 => {
                    let e = args.remove(1);
                    let ok = args.remove(0);
                    Ty::result(ok, e)
                }
                _ => return Err(arity_err(2)),
            }
        }
        "Arc" => {
            let mut args = args;
            match args.len() {
                1 => Ty::Shared(Box::new(args.remove(0))),
                _ => return Err(arity_err(1)),
            }
        }
        "Mutex" => {
            let mut args = args;
            match args.len() {
                1 => Ty::Guarded(Box::new(args.remove(0))),
                _ => return Err(arity_err(1)),
            }
        }
        _ => Ty::Named {
            path: name.to_string(),
            args,
        },
    })
}

/// Substitute `{self}`, `{argN}`, and `{args}` into a stub template.
/// Templates never re-enter the parser.
pub fn expand_template(template: &str, receiver: Option<&str>, args: &[String]) -> String {
    let mut out = template.to_string();
    if let Some(recv) = receiver {
        out = out.replace("{self}", recv);
    }
    for (i, arg) in args.iter().enumerate() {
        out = out.replace(&format!("{{arg{i}}}"), arg);
    }
    out.replace("{args}", &args.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_type_strings() {
        assert_eq!(parse_type_str("int").unwrap(), Ty::Int);
        assert_eq!(
            parse_type_str("Result[int, str]").unwrap(),
            Ty::result(Ty::Int, Ty::String)
        );
        assert_eq!(
            parse_type_str("tuple[Sender, Receiver]").unwrap(),
            Ty::Tuple(vec![Ty::named("Sender"), Ty::named("Receiver")])
        );
        assert_eq!(
            parse_type_str("str | None").unwrap(),
            Ty::option(Ty::String)
        );
        assert_eq!(
            parse_type_str("Arc[Mutex[int]]").unwrap(),
            Ty::shared(Ty::guarded(Ty::Int))
        );
    }

    #[test]
    fn bad_type_strings_fail() {
        assert!(parse_type_str("list").is_err());
        assert!(parse_type_str("int]").is_err());
        assert!(parse_type_str("int | str").is_err());
    }

    #[test]
    fn template_expansion_is_textual() {
        let out = expand_template(
            "{self}.send({arg0}).await",
            Some("tx"),
            &["value".to_string()],
        );
        assert_eq!(out, "tx.send(value).await");
        let out = expand_template("mpsc::channel({args})", None, &["10".to_string()]);
        assert_eq!(out, "mpsc::channel(10)");
    }

    #[test]
    fn parse_minimal_package() {
        let text = r#"
[package]
name = "tokio"
rust_crate = "tokio"
rust_version = "1"
src_module = "channels"

[cargo.dependencies]
tokio = { version = "1", features = ["full"] }

[[mappings.functions]]
src = "mpsc_channel"
params = ["int"]
returns = "tuple[Sender, Receiver]"
rust_code = "mpsc::channel({arg0} as usize)"
rust_imports = ["tokio::sync::mpsc"]

[[mappings.methods]]
src = "Receiver.recv"
returns = "Optional[int]"
rust_code = "{self}.recv().await"
mutates_receiver = true

[[mappings.types]]
src = "Receiver"
rust = "tokio::sync::mpsc::Receiver"
"#;
        let pkg = parse_stub_package(text).expect("package should parse");
        assert_eq!(pkg.name, "tokio");
        assert_eq!(pkg.requirements.len(), 1);
        assert!(pkg.requirements[0].features.contains("full"));
        assert!(pkg.functions.contains_key("mpsc_channel"));
        let recv = pkg.methods.get("Receiver.recv").unwrap();
        assert!(recv.mutates_receiver);
        assert_eq!(pkg.types.get("Receiver").unwrap().rust, "tokio::sync::mpsc::Receiver");
    }

    #[test]
    fn invalid_version_is_rejected() {
        let text = r#"
[package]
name = "x"
rust_crate = "x"
rust_version = "not a version"
"#;
        assert!(parse_stub_package(text).is_err());
    }
}
