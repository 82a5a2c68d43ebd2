//! End-to-end runs of the `spiderscript` binary.

use std::io::Write as _;
use std::process::Command;

fn run(args: &[&str]) -> std::process::Output {
  Command::new(env!("CARGO_BIN_EXE_spiderscript"))
    .args(args)
    .output()
    .expect("failed to launch the binary")
}

#[test]
fn parses_a_file_and_round_trips() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  writeln!(file, "#version(1,2,3)").unwrap();
  writeln!(file, "import m alias x;").unwrap();
  writeln!(file, "let answer = 6 * 7;").unwrap();
  file.flush().unwrap();

  let out = run(&[file.path().to_str().unwrap()]);
  assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

  let stdout = String::from_utf8(out.stdout).unwrap();
  assert!(stdout.contains("#version(1, 2, 3)"));
  assert!(stdout.contains("import m alias x;"));
  assert!(stdout.contains("let answer = 6 * 7;"));
  assert!(String::from_utf8_lossy(&out.stderr).contains("No errors."));
}

#[test]
fn reports_parse_errors_on_stderr() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  writeln!(file, "let = 3;").unwrap();
  writeln!(file, "let y = 4;").unwrap();
  file.flush().unwrap();

  let out = run(&[file.path().to_str().unwrap()]);
  assert!(out.status.success());

  let stdout = String::from_utf8(out.stdout).unwrap();
  assert!(stdout.contains("let y = 4;"));
  let stderr = String::from_utf8(out.stderr).unwrap();
  assert!(stderr.contains("error:"));
  assert!(stderr.contains("expected a variable name"));
}

#[test]
fn unreadable_files_fail() {
  let out = run(&["/no/such/file.spider"]);
  assert!(!out.status.success());
  assert!(String::from_utf8_lossy(&out.stderr).contains("cannot read"));
}

#[test]
fn help_exits_cleanly() {
  let out = run(&["--help"]);
  assert!(out.status.success());
  assert!(String::from_utf8_lossy(&out.stdout).contains("Parse SpiderScript source files"));
}
