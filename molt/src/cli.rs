#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::{Parser, Subcommand};
use molt_core::{Diagnostic, DiagnosticKind, DiagnosticSink};
use molt_stubs::StubRegistry;
use tracing::{debug, info};

use crate::assemble::assemble;
use crate::pipeline::{collect_inputs, dump_tir, run_pipeline, SourceFile};
use crate::report::render_diagnostics;

pub const EXIT_OK: i32 = 0;
pub const EXIT_DIAGNOSTICS: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "molt", version, about = "Typed-subset source translator")]
pub struct Cli {
    /// Verbose logging (stage transitions, stub lookups).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Additional stub package directories (repeatable).
    #[arg(long = "stubs", global = true, value_name = "DIR")]
    pub stubs: Vec<PathBuf>,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Translate an input file or directory into a buildable project.
    Transpile {
        input: PathBuf,
        /// Output directory for the generated project.
        #[arg(short, long)]
        out: PathBuf,
        /// Project name; defaults to the input stem.
        #[arg(short = 'n', long)]
        name: Option<String>,
    },
    /// Print a textual dump of the typed IR.
    Parse { input: PathBuf },
    /// Translate, then build the result with the downstream toolchain.
    Test {
        input: PathBuf,
        /// Also execute the produced binary.
        #[arg(long)]
        run: bool,
    },
}

pub fn run(cli: Cli) -> i32 {
    if cli.verbose {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_writer(std::io::stderr)
            .try_init();
    }

    match cli.cmd {
        Cmd::Transpile { input, out, name } => transpile(&input, &out, name, &cli.stubs),
        Cmd::Parse { input } => parse_dump(&input),
        Cmd::Test { input, run } => test_build(&input, run, &cli.stubs),
    }
}

fn load_registry(input: &Path, stub_dirs: &[PathBuf], sink: &mut DiagnosticSink) -> StubRegistry {
    let mut registry = match StubRegistry::with_builtins() {
        Ok(r) => r,
        Err(e) => {
            sink.push(Diagnostic::new(
                DiagnosticKind::StubLoad,
                input,
                None,
                e.message,
            ));
            StubRegistry::empty()
        }
    };

    let mut dirs: Vec<PathBuf> = stub_dirs.to_vec();
    let default_dir = if input.is_dir() {
        input.join("stubs")
    } else {
        input
            .parent()
            .map(|p| p.join("stubs"))
            .unwrap_or_else(|| PathBuf::from("stubs"))
    };
    if default_dir.is_dir() {
        dirs.push(default_dir);
    }

    for dir in dirs {
        match registry.load_dir(&dir) {
            Ok(n) => debug!(dir = %dir.display(), packages = n, "loaded stub directory"),
            Err(e) => sink.push(Diagnostic::new(
                DiagnosticKind::StubLoad,
                &dir,
                None,
                e.message,
            )),
        }
    }
    registry
}

fn source_map(files: &[SourceFile]) -> HashMap<PathBuf, String> {
    files
        .iter()
        .map(|f| (f.path.clone(), f.text.clone()))
        .collect()
}

fn report_and_exit_code(sink: DiagnosticSink, sources: &HashMap<PathBuf, String>) -> i32 {
    if sink.is_empty() {
        return EXIT_OK;
    }
    eprintln!("{}", render_diagnostics(&sink.into_vec(), sources));
    EXIT_DIAGNOSTICS
}

fn infer_name(input: &Path, explicit: Option<String>) -> String {
    if let Some(n) = explicit {
        return n;
    }
    input
        .file_stem()
        .map(|s| s.to_string_lossy().replace('_', "-"))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "translated".to_string())
}

fn transpile(input: &Path, out: &Path, name: Option<String>, stub_dirs: &[PathBuf]) -> i32 {
    let mut sink = DiagnosticSink::new();
    let registry = load_registry(input, stub_dirs, &mut sink);
    let files = collect_inputs(input, &mut sink);
    let sources = source_map(&files);
    let project = infer_name(input, name);

    let output = if sink.has_errors() {
        None
    } else {
        run_pipeline(&files, &registry, &project, &mut sink)
    };

    let Some(output) = output else {
        return report_and_exit_code(sink, &sources);
    };

    if let Err(e) = assemble(out, &project, &output) {
        // Writes may already have begun; the partial tree stays in place.
        sink.push(Diagnostic::new(DiagnosticKind::Io, out, None, e.message));
        return report_and_exit_code(sink, &sources);
    }

    info!(out = %out.display(), project = %project, "project written");
    EXIT_OK
}

fn parse_dump(input: &Path) -> i32 {
    let mut sink = DiagnosticSink::new();
    let files = collect_inputs(input, &mut sink);
    let sources = source_map(&files);

    let dump = if sink.has_errors() {
        None
    } else {
        dump_tir(&files, &mut sink)
    };

    match dump {
        Some(text) => {
            println!("{text}");
            EXIT_OK
        }
        None => report_and_exit_code(sink, &sources),
    }
}

fn test_build(input: &Path, run: bool, stub_dirs: &[PathBuf]) -> i32 {
    let tmp = match tempfile::TempDir::new() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}: E_IO: cannot create build directory: {e}", input.display());
            return EXIT_DIAGNOSTICS;
        }
    };

    let code = transpile(input, tmp.path(), None, stub_dirs);
    if code != EXIT_OK {
        return code;
    }

    let status = Command::new("cargo")
        .arg("build")
        .current_dir(tmp.path())
        .status();
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => {
            eprintln!("downstream build failed with {s}");
            return EXIT_DIAGNOSTICS;
        }
        Err(e) => {
            eprintln!("{}: E_IO: cannot invoke cargo: {e}", input.display());
            return EXIT_DIAGNOSTICS;
        }
    }

    if run {
        let status = Command::new("cargo")
            .args(["run", "-q"])
            .current_dir(tmp.path())
            .status();
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => {
                eprintln!("program exited with {s}");
                return EXIT_DIAGNOSTICS;
            }
            Err(e) => {
                eprintln!("{}: E_IO: cannot invoke cargo: {e}", input.display());
                return EXIT_DIAGNOSTICS;
            }
        }
    }

    EXIT_OK
}
