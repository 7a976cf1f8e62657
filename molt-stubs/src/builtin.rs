#![forbid(unsafe_code)]

use crate::metadata::{parse_stub_package, StubError, StubPackage};

/// Compiled-in stub set for the std-adjacent surface. These use the exact
/// schema of discovered packages so the loader and lookup paths are shared.
const STD_FS: &str = r#"
[package]
name = "std-fs"
rust_crate = "std"
rust_version = "*"
src_module = "fs"

[[mappings.functions]]
src = "fs.read_to_string"
params = ["str"]
returns = "str"
rust_code = "std::fs::read_to_string({arg0})"
needs_result = true

[[mappings.functions]]
src = "fs.write"
params = ["str", "str"]
rust_code = "std::fs::write({arg0}, {arg1})"
needs_result = true

[[mappings.functions]]
src = "fs.create_dir_all"
params = ["str"]
rust_code = "std::fs::create_dir_all({arg0})"
needs_result = true

[[mappings.functions]]
src = "fs.remove_file"
params = ["str"]
rust_code = "std::fs::remove_file({arg0})"
needs_result = true

[[mappings.functions]]
src = "fs.exists"
params = ["str"]
returns = "bool"
rust_code = "std::path::Path::new(&{arg0}).exists()"
"#;

const STD_TIME: &str = r#"
[package]
name = "std-time"
rust_crate = "std"
rust_version = "*"
src_module = "time"

[[mappings.functions]]
src = "time.sleep"
params = ["float"]
rust_code = "std::thread::sleep(std::time::Duration::from_secs_f64({arg0}))"

[[mappings.functions]]
src = "time.time"
returns = "float"
rust_code = "std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)"
"#;

const LOGGING: &str = r#"
[package]
name = "log"
rust_crate = "log"
rust_version = "0.4"
src_module = "logging"

[cargo.dependencies]
log = "0.4"
env_logger = "0.11"

[[mappings.functions]]
src = "logging.basicConfig"
rust_code = "env_logger::init()"

[[mappings.functions]]
src = "logging.debug"
params = ["str"]
rust_code = "log::debug!(\"{}\", {arg0})"

[[mappings.functions]]
src = "logging.info"
params = ["str"]
rust_code = "log::info!(\"{}\", {arg0})"

[[mappings.functions]]
src = "logging.warning"
params = ["str"]
rust_code = "log::warn!(\"{}\", {arg0})"

[[mappings.functions]]
src = "logging.error"
params = ["str"]
rust_code = "log::error!(\"{}\", {arg0})"
"#;

const TEMPFILE: &str = r#"
[package]
name = "tempfile"
rust_crate = "tempfile"
rust_version = "3"
src_module = "tempfile"

[cargo.dependencies]
tempfile = "3"

[[mappings.functions]]
src = "tempfile.TemporaryDirectory"
returns = "TempDir"
rust_code = "tempfile::tempdir()"
needs_result = true
bind_template = "{ctx}.path().to_string_lossy().to_string()"

[[mappings.types]]
src = "TempDir"
rust = "tempfile::TempDir"
"#;

const TOKIO: &str = r#"
[package]
name = "tokio"
rust_crate = "tokio"
rust_version = "1"
src_module = "asyncio"

[cargo.dependencies]
tokio = { version = "1", features = ["full"] }

[[mappings.functions]]
src = "mpsc_channel"
params = ["int"]
returns = "tuple[Sender, Receiver]"
rust_code = "mpsc::channel({arg0} as usize)"
rust_imports = ["tokio::sync::mpsc"]

[[mappings.functions]]
src = "spawn"
returns = "JoinHandle"
rust_code = "tokio::spawn({arg0})"

[[mappings.functions]]
src = "asyncio.sleep"
params = ["float"]
rust_code = "tokio::time::sleep(std::time::Duration::from_secs_f64({arg0})).await"

[[mappings.methods]]
src = "Sender.send"
returns = "None"
rust_code = "{self}.send({arg0}).await"

[[mappings.methods]]
src = "Receiver.recv"
returns = "Optional[int]"
rust_code = "{self}.recv().await"
mutates_receiver = true

[[mappings.types]]
src = "Sender"
rust = "tokio::sync::mpsc::Sender"

[[mappings.types]]
src = "Receiver"
rust = "tokio::sync::mpsc::Receiver"

[[mappings.types]]
src = "JoinHandle"
rust = "tokio::task::JoinHandle"
"#;

const ENV: &str = r#"
[package]
name = "std-env"
rust_crate = "std"
rust_version = "*"
src_module = "env"

[[mappings.functions]]
src = "env.args"
returns = "list[str]"
rust_code = "std::env::args().collect::<Vec<String>>()"

[[mappings.functions]]
src = "env.var"
params = ["str"]
returns = "str"
rust_code = "std::env::var(&{arg0})"
needs_result = true
"#;

pub fn builtin_packages() -> Result<Vec<StubPackage>, StubError> {
    [STD_FS, STD_TIME, LOGGING, TEMPFILE, TOKIO, ENV]
        .iter()
        .map(|text| parse_stub_package(text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtin_packages_parse() {
        let pkgs = builtin_packages().expect("builtin stubs must be well-formed");
        assert_eq!(pkgs.len(), 6);
    }

    #[test]
    fn tokio_channel_mapping_shape() {
        let pkgs = builtin_packages().expect("builtin stubs must be well-formed");
        let tokio = pkgs.iter().find(|p| p.name == "tokio").unwrap();
        let chan = tokio.functions.get("mpsc_channel").unwrap();
        assert_eq!(chan.rust_imports, vec!["tokio::sync::mpsc".to_string()]);
        assert!(!chan.needs_result);
    }
}
