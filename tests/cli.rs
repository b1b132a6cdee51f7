//! End-to-end tests that invoke the compiled `pgspa` binary as a subprocess.
//!
//! These cover the offline surface: usage handling, version output, project
//! initialization, and reference-resolution failures (which are diagnosed
//! before any connection is opened). Live-server scenarios live in
//! `tests/exec_live.rs`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Locate the compiled binary built by `cargo test`.
fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pgspa"))
}

/// Run the binary with the given arguments from `dir`.
fn run_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(binary_path())
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to execute pgspa binary")
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Create a project root (with marker) inside a fresh temp dir.
fn project_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir(dir.path().join(".pgspa")).expect("create marker");
    dir
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, contents).expect("write file");
}

// ===========================================================================
// Usage and version
// ===========================================================================

#[test]
fn no_arguments_prints_usage_and_exits_1() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_in(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Usage"), "no usage in stderr");
}

#[test]
fn unknown_command_exits_1() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_in(dir.path(), &["frobnicate"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn unknown_option_exits_1() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_in(dir.path(), &["exec", "--frob=1", "foo"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn help_exits_0() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_in(dir.path(), &["help"]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn per_command_help_exits_0() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_in(dir.path(), &["help", "exec"]);
    assert_eq!(output.status.code(), Some(0));
    let help = String::from_utf8_lossy(&output.stdout).to_string();
    assert!(help.contains("--host"), "exec help lists --host: {help}");
}

#[test]
fn version_prints_major_minor() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_in(dir.path(), &["version"]);
    assert_eq!(output.status.code(), Some(0));

    let printed = String::from_utf8_lossy(&output.stdout);
    let expected = format!(
        "{}.{}\n",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR")
    );
    assert_eq!(printed, expected);
}

// ===========================================================================
// init
// ===========================================================================

#[test]
fn init_creates_the_marker_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_in(dir.path(), &["init"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(dir.path().join(".pgspa").is_dir());
}

#[test]
fn init_twice_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert_eq!(run_in(dir.path(), &["init"]).status.code(), Some(0));
    assert_eq!(run_in(dir.path(), &["init"]).status.code(), Some(0));
}

#[cfg(unix)]
#[test]
fn init_sets_marker_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    run_in(dir.path(), &["init"]);

    let mode = fs::metadata(dir.path().join(".pgspa"))
        .expect("metadata")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}

// ===========================================================================
// exec: failures diagnosed before any connection is opened
// ===========================================================================

#[test]
fn exec_without_references_exits_1() {
    let root = project_root();
    let output = run_in(root.path(), &["exec"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn exec_outside_a_project_exits_1() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_in(dir.path(), &["exec", "foo"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr_of(&output).contains("no .pgspa directory found"),
        "got: {}",
        stderr_of(&output)
    );
}

#[test]
fn exec_invalid_reference_exits_1() {
    let root = project_root();
    let output = run_in(root.path(), &["exec", "ghost"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr_of(&output).contains("invalid reference \"ghost\" specified"),
        "got: {}",
        stderr_of(&output)
    );
}

#[test]
fn exec_cyclic_reference_exits_1_with_trace() {
    let root = project_root();
    write(root.path(), "x", "y\n");
    write(root.path(), "y", "x\n");

    let output = run_in(root.path(), &["exec", "x"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr_of(&output).contains("reference cyclicity detected: \"x -> y -> x\""),
        "got: {}",
        stderr_of(&output)
    );
}

#[test]
fn exec_explicit_directory_via_parent_exits_1() {
    let root = project_root();
    write(root.path(), "top/guarded/.pgspa", "explicit=yes\n");
    write(root.path(), "top/guarded/g.sql", "SELECT 1;");

    let output = run_in(root.path(), &["exec", "top"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr_of(&output).contains("allowed to be used only explicitly"),
        "got: {}",
        stderr_of(&output)
    );
}

#[test]
fn exec_unknown_policy_key_exits_1() {
    let root = project_root();
    write(root.path(), "top/.pgspa", "explict=yes\n");
    write(root.path(), "top/g.sql", "SELECT 1;");

    let output = run_in(root.path(), &["exec", "top"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr_of(&output).contains("unknown parameter \"explict\""),
        "got: {}",
        stderr_of(&output)
    );
}

#[test]
fn exec_dotted_reference_exits_1() {
    let root = project_root();
    let output = run_in(root.path(), &["exec", ".hidden"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr_of(&output).contains("cannot be empty or start with a dot"),
        "got: {}",
        stderr_of(&output)
    );
}

#[test]
fn exec_unparseable_sql_exits_1_before_connecting() {
    let root = project_root();
    write(root.path(), "bad.sql", "CREATE TABL t(x int);");

    let output = run_in(root.path(), &["exec", "bad"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr_of(&output).contains("syntax error"),
        "got: {}",
        stderr_of(&output)
    );
}

#[test]
fn exec_resolves_from_a_subdirectory_of_the_root() {
    // References stay root-relative no matter where the tool runs.
    let root = project_root();
    write(root.path(), "sub/dir/keep", "");
    write(root.path(), "missing_elsewhere", "nope\n");

    let output = run_in(&root.path().join("sub/dir"), &["exec", "missing_elsewhere"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr_of(&output).contains("invalid reference \"nope\" specified"),
        "got: {}",
        stderr_of(&output)
    );
}
