#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use miette::Diagnostic;
use molt_stubs::CrateRequirement;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::pipeline::PipelineOutput;

#[derive(Debug, Error, Diagnostic)]
#[error("assembly error: {message}")]
#[diagnostic(code(molt::assemble))]
pub struct AssembleError {
    pub message: String,
}

impl AssembleError {
    fn io(what: &Path, e: std::io::Error) -> Self {
        Self {
            message: format!("{}: {e}", what.display()),
        }
    }
}

/// Write the translated project: source tree plus build manifest.
///
/// The output directory is created only here, once emission has fully
/// succeeded, so failing runs leave no partial tree behind.
pub fn assemble(out_dir: &Path, name: &str, output: &PipelineOutput) -> Result<(), AssembleError> {
    let src_dir = out_dir.join("src");
    fs::create_dir_all(&src_dir).map_err(|e| AssembleError::io(&src_dir, e))?;

    if output.single_file {
        let unit = output
            .units
            .first()
            .ok_or_else(|| AssembleError {
                message: "nothing to assemble".to_string(),
            })?;
        let main_rs = src_dir.join("main.rs");
        fs::write(&main_rs, &unit.emitted.text).map_err(|e| AssembleError::io(&main_rs, e))?;
        debug!(path = %main_rs.display(), "wrote entry module");
    } else {
        // The module named `main` is the binary root; everything else is a
        // library module declared from lib.rs.
        let entry_is_main = output.entry.as_deref() == Some("main");
        let mut lib_lines: Vec<String> = Vec::new();

        for unit in &output.units {
            if entry_is_main && unit.name == "main" {
                continue;
            }
            let file = src_dir.join(format!("{}.rs", unit.name));
            fs::write(&file, &unit.emitted.text).map_err(|e| AssembleError::io(&file, e))?;
            lib_lines.push(format!("pub mod {};", unit.name));
            debug!(path = %file.display(), "wrote module");
        }
        lib_lines.sort();

        let lib_rs = src_dir.join("lib.rs");
        fs::write(&lib_rs, format!("{}\n", lib_lines.join("\n")))
            .map_err(|e| AssembleError::io(&lib_rs, e))?;

        match &output.entry {
            Some(entry) if entry_is_main => {
                let unit = output
                    .units
                    .iter()
                    .find(|u| u.name == *entry)
                    .ok_or_else(|| AssembleError {
                        message: "entry module missing from emission".to_string(),
                    })?;
                let main_rs = src_dir.join("main.rs");
                fs::write(&main_rs, &unit.emitted.text)
                    .map_err(|e| AssembleError::io(&main_rs, e))?;
            }
            Some(entry) => {
                let crate_ident = name.replace('-', "_");
                let main_rs = src_dir.join("main.rs");
                let shim = format!("fn main() {{\n    {crate_ident}::{entry}::main();\n}}\n");
                fs::write(&main_rs, shim).map_err(|e| AssembleError::io(&main_rs, e))?;
            }
            None => {}
        }
    }

    let manifest = generate_manifest(name, output);
    let manifest_path = out_dir.join("Cargo.toml");
    fs::write(&manifest_path, manifest).map_err(|e| AssembleError::io(&manifest_path, e))?;

    Ok(())
}

/// Synthesize the build manifest: package header, the accumulated
/// dependency set, the binary target, and the fixed lints stanza.
pub fn generate_manifest(name: &str, output: &PipelineOutput) -> String {
    let mut deps: BTreeMap<String, CrateRequirement> = output.requirements.clone();
    apply_attr_dependencies(&output.attrs, &mut deps);

    let mut lines: Vec<String> = Vec::new();
    lines.push("[package]".to_string());
    lines.push(format!("name = \"{name}\""));
    lines.push("version = \"0.1.0\"".to_string());
    lines.push("edition = \"2021\"".to_string());
    lines.push(String::new());

    if !deps.is_empty() {
        lines.push("[dependencies]".to_string());
        for req in deps.values() {
            lines.push(req.to_toml_line());
        }
        lines.push(String::new());
    }

    let has_entry = output.single_file || output.entry.is_some();
    if has_entry {
        lines.push("[[bin]]".to_string());
        lines.push(format!("name = \"{name}\""));
        lines.push("path = \"src/main.rs\"".to_string());
        lines.push(String::new());
    }

    // Channel operations return ignorable results, and the index-cast rule
    // can produce casts the target type already implies.
    lines.push("[lints.rust]".to_string());
    lines.push("unused_must_use = \"allow\"".to_string());
    lines.push(String::new());
    lines.push("[lints.clippy]".to_string());
    lines.push("unnecessary_cast = \"allow\"".to_string());
    lines.push("vec_init_then_push = \"allow\"".to_string());
    lines.push("unnecessary_to_owned = \"allow\"".to_string());
    lines.push("format_in_format_args = \"allow\"".to_string());
    lines.push(String::new());

    lines.join("\n")
}

/// Derive-style pass-through attributes pull their proc-macro crates into
/// the manifest.
fn apply_attr_dependencies(attrs: &[String], deps: &mut BTreeMap<String, CrateRequirement>) {
    let derive_re = match Regex::new(r"#\[derive\(([^)]+)\)") {
        Ok(re) => re,
        Err(_) => return,
    };

    let mut uses_serde = false;
    let mut uses_clap_parser = false;

    for attr in attrs {
        if let Some(caps) = derive_re.captures(attr) {
            let derives: Vec<&str> = caps[1].split(',').map(|d| d.trim()).collect();
            if derives.contains(&"Serialize") || derives.contains(&"Deserialize") {
                uses_serde = true;
            }
            if derives.contains(&"Parser") {
                uses_clap_parser = true;
            }
        }
    }

    if uses_serde {
        let req = CrateRequirement {
            name: "serde".to_string(),
            version: "1".to_string(),
            features: ["derive".to_string()].into_iter().collect(),
        };
        deps.entry("serde".to_string())
            .and_modify(|r| r.merge(&req))
            .or_insert(req);
    }

    if uses_clap_parser {
        if let Some(clap) = deps.get_mut("clap") {
            clap.features.insert("derive".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineOutput;

    fn empty_output(attrs: Vec<String>) -> PipelineOutput {
        PipelineOutput {
            units: Vec::new(),
            entry: None,
            requirements: BTreeMap::new(),
            attrs,
            single_file: true,
        }
    }

    #[test]
    fn manifest_has_lints_stanza() {
        let manifest = generate_manifest("demo", &empty_output(Vec::new()));
        assert!(manifest.contains("unused_must_use = \"allow\""));
        assert!(manifest.contains("unnecessary_cast = \"allow\""));
        assert!(manifest.contains("name = \"demo\""));
    }

    #[test]
    fn serde_derive_attr_adds_dependency() {
        let manifest = generate_manifest(
            "demo",
            &empty_output(vec!["#[derive(Debug, Serialize)]".to_string()]),
        );
        assert!(manifest.contains("serde = { version = \"1\", features = [\"derive\"] }"));
    }

    #[test]
    fn clap_parser_attr_only_extends_existing_dependency() {
        let manifest = generate_manifest(
            "demo",
            &empty_output(vec!["#[derive(Parser)]".to_string()]),
        );
        assert!(!manifest.contains("clap"));

        let mut output = empty_output(vec!["#[derive(Parser)]".to_string()]);
        output.requirements.insert(
            "clap".to_string(),
            CrateRequirement {
                name: "clap".to_string(),
                version: "4".to_string(),
                features: Default::default(),
            },
        );
        let manifest = generate_manifest("demo", &output);
        assert!(manifest.contains("clap = { version = \"4\", features = [\"derive\"] }"));
    }
}
