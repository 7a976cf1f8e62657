#![forbid(unsafe_code)]

use clap::Parser;

use molt::cli::{run, Cli};

fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli));
}
