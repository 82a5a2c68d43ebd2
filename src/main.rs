//! The `spiderscript` binary: lex and parse source files, print the
//! round-tripped form, and report parse errors on stderr.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use spiderscript::syntax::{Lexer, Parser};

#[derive(clap::Parser)]
#[command(name = "spiderscript", about = "Parse SpiderScript source files", version)]
struct Args {
  /// Source files to parse.
  files: Vec<PathBuf>,
}

fn main() -> ExitCode {
  env_logger::init();
  let args = Args::parse();

  for path in &args.files {
    if let Err(e) = run_file(path) {
      eprintln!("error: {e:#}");
      return ExitCode::FAILURE;
    }
  }
  ExitCode::SUCCESS
}

fn run_file(path: &PathBuf) -> anyhow::Result<()> {
  let text = fs::read_to_string(path)
    .with_context(|| format!("cannot read {}", path.display()))?;
  log::info!("parsing {}", path.display());

  let mut parser = Parser::new(Lexer::new(&text));
  let file = parser.parse_file();
  print!("{file}");

  if parser.errors().is_empty() {
    eprintln!("No errors.");
  } else {
    for error in parser.errors() {
      eprintln!("error: {}: {error}", path.display());
    }
  }
  Ok(())
}
