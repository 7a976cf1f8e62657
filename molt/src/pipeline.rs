#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use molt_backend_rust::{emit_module, EmitOptions, EmittedModule};
use molt_core::{
    analyze_module, collect_exports, lower_module, Diagnostic, DiagnosticKind, DiagnosticSink,
    ModuleExports,
};
use molt_ir::{ModuleIr, NodeIdGen};
use molt_parse::parse_source;
use molt_stubs::{CrateRequirement, StubRegistry};
use tracing::debug;

/// One input file queued for translation.
pub struct SourceFile {
    pub path: PathBuf,
    pub module: String,
    pub text: String,
}

#[derive(Debug)]
pub struct EmittedUnit {
    pub name: String,
    pub emitted: EmittedModule,
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub units: Vec<EmittedUnit>,
    pub entry: Option<String>,
    pub requirements: BTreeMap<String, CrateRequirement>,
    /// Pass-through attribute strings, inspected for manifest-relevant
    /// derives.
    pub attrs: Vec<String>,
    pub single_file: bool,
}

/// Resolve the input path into an ordered list of source files. A file is
/// taken as-is; a directory contributes its `*.py` entries sorted by name.
pub fn collect_inputs(input: &Path, sink: &mut DiagnosticSink) -> Vec<SourceFile> {
    let mut files = Vec::new();

    if input.is_file() {
        push_source(input, sink, &mut files);
        return files;
    }

    let entries = match fs::read_dir(input) {
        Ok(e) => e,
        Err(e) => {
            sink.push(Diagnostic::new(
                DiagnosticKind::Io,
                input,
                None,
                format!("cannot read input directory: {e}"),
            ));
            return files;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "py"))
        .collect();
    paths.sort();

    for path in paths {
        push_source(&path, sink, &mut files);
    }
    files
}

fn push_source(path: &Path, sink: &mut DiagnosticSink, files: &mut Vec<SourceFile>) {
    let module = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "main".to_string());
    match fs::read_to_string(path) {
        Ok(text) => files.push(SourceFile {
            path: path.to_path_buf(),
            module,
            text,
        }),
        Err(e) => sink.push(Diagnostic::new(
            DiagnosticKind::Io,
            path,
            None,
            format!("cannot read input: {e}"),
        )),
    }
}

/// Parse and lower every input. Parse failures are collected per file and
/// the surviving modules still flow into analysis.
pub fn lower_inputs(files: &[SourceFile], sink: &mut DiagnosticSink) -> Vec<ModuleIr> {
    let mut ids = NodeIdGen::new();
    let mut modules = Vec::new();

    for file in files {
        debug!(path = %file.path.display(), "parsing");
        match parse_source(&file.text) {
            Ok(ast) => {
                modules.push(lower_module(&file.module, &file.path, &ast, &mut ids, sink));
            }
            Err(e) => {
                let kind = if e.unsupported {
                    DiagnosticKind::UnsupportedConstruct
                } else {
                    DiagnosticKind::Parse
                };
                sink.error(kind, &file.path, e.span, e.message);
            }
        }
    }
    modules
}

/// Full translation: parse, lower, analyze, emit. Returns `None` when any
/// diagnostic was raised; emission never runs on a dirty sink.
///
/// `project` names the produced crate; in the directory layout the entry
/// module lands at `src/main.rs` and imports its siblings through that
/// crate name rather than `crate::`.
pub fn run_pipeline(
    files: &[SourceFile],
    registry: &StubRegistry,
    project: &str,
    sink: &mut DiagnosticSink,
) -> Option<PipelineOutput> {
    let modules = lower_inputs(files, sink);

    let mut externals: HashMap<String, ModuleExports> = HashMap::new();
    for m in &modules {
        externals.insert(m.name.clone(), collect_exports(m));
    }

    let mut analyses = Vec::new();
    for (m, file) in modules.iter().zip(files.iter()) {
        debug!(module = %m.name, "analyzing");
        let analysis = analyze_module(m, registry, &externals, &file.path, sink);
        analyses.push(analysis);
    }

    if sink.has_errors() {
        return None;
    }

    let local_modules: BTreeSet<String> = modules.iter().map(|m| m.name.clone()).collect();
    let single_file = files.len() == 1;
    let crate_ident = project.replace('-', "_");

    let mut units = Vec::new();
    let mut requirements: BTreeMap<String, CrateRequirement> = BTreeMap::new();
    let mut attrs = Vec::new();
    let mut entry = None;

    for (m, analysis) in modules.iter().zip(analyses.iter()) {
        debug!(module = %m.name, "emitting");
        let opts = EmitOptions {
            // The entry module becomes the binary root, outside the
            // library, so sibling imports go through the crate name.
            crate_name: if !single_file && m.name == "main" {
                Some(crate_ident.clone())
            } else {
                None
            },
            local_modules: local_modules.clone(),
        };
        let emitted = match emit_module(m, analysis, registry, &opts) {
            Ok(e) => e,
            Err(e) => {
                sink.push(Diagnostic::new(
                    DiagnosticKind::Io,
                    PathBuf::from(&m.name),
                    None,
                    e.message,
                ));
                return None;
            }
        };
        for req in emitted.requirements.values() {
            merge_requirement(&mut requirements, req);
        }
        collect_attrs(m, &mut attrs);
        if m.entry_function().is_some() {
            entry = Some(m.name.clone());
        }
        units.push(EmittedUnit {
            name: m.name.clone(),
            emitted,
        });
    }

    for req in registry.collect_requirements().values() {
        merge_requirement(&mut requirements, req);
    }

    Some(PipelineOutput {
        units,
        entry,
        requirements,
        attrs,
        single_file,
    })
}

/// Textual dump of the typed IR for the `parse` subcommand.
pub fn dump_tir(files: &[SourceFile], sink: &mut DiagnosticSink) -> Option<String> {
    let modules = lower_inputs(files, sink);
    if sink.has_errors() {
        return None;
    }
    match serde_json::to_string_pretty(&modules) {
        Ok(s) => Some(s),
        Err(e) => {
            sink.push(Diagnostic::new(
                DiagnosticKind::Io,
                PathBuf::from("<dump>"),
                None,
                format!("cannot serialize IR: {e}"),
            ));
            None
        }
    }
}

fn merge_requirement(into: &mut BTreeMap<String, CrateRequirement>, req: &CrateRequirement) {
    into.entry(req.name.clone())
        .and_modify(|r| r.merge(req))
        .or_insert_with(|| req.clone());
}

fn collect_attrs(m: &ModuleIr, out: &mut Vec<String>) {
    for c in &m.classes {
        out.extend(c.attrs.iter().cloned());
        for method in &c.methods {
            out.extend(method.attrs.iter().cloned());
        }
    }
    for f in &m.functions {
        out.extend(f.attrs.iter().cloned());
    }
}
