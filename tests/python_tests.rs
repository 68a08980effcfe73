//! End-to-end tests against the packaged Python guest image.
//!
//! These attempt normal scripts and various escape techniques to verify the
//! sandbox behaves and properly restricts access to the host system.

use execr::prelude::*;

fn options() -> ExecuteOptions {
    ExecuteOptions::new().package_mount(None)
}

fn run(code: &str) -> ExecutionResult {
    execute(code, &options()).unwrap()
}

/// Test that a print reaches stdout and nothing else.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_hello() {
    let result = run("print('hello')");

    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "");
    assert!(result.fuel_consumed.is_none());
    assert_eq!(result.memory_pages * result.page_size, result.memory_bytes);
}

/// Test that stdin is readable in full.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_stdin_roundtrip() {
    let result = execute(
        "import sys; sys.stdout.write(sys.stdin.read())",
        &options().stdin("abc"),
    )
    .unwrap();

    assert_eq!(result.stdout, "abc");
}

/// Test that extra arguments show up in `sys.argv`.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_argv_tail() {
    let result = execute("import sys; print(sys.argv[1:])", &options().args(["x", "y"])).unwrap();
    assert_eq!(result.stdout, "['x', 'y']\n");
}

/// Test that identical runs give identical output.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_deterministic_output() {
    let code = "print(sum(i * i for i in range(1000)))";
    let first = run(code);
    let second = run(code);

    assert_eq!(first.stdout, second.stdout);
    assert_eq!(first.stderr, second.stderr);
}

/// Test that infinite loops are bounded by fuel.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_infinite_loop_exhausts_fuel() {
    let result = execute("while True: pass", &options().fuel(5_000_000)).unwrap();

    assert!(result.fuel_exhausted());
    assert_eq!(result.fuel_consumed, Some(5_000_000));
}

/// Test that an uncaught exception is reported, not raised.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_exception_is_captured() {
    let result = run("1 / 0");

    assert!(!result.is_success());
    let exception = result.guest_exception().unwrap();
    assert_eq!(exception.exception_type, "ZeroDivisionError");
    assert!(exception.traceback.is_some());
}

/// Test that the generated script is the only thing in the guest root.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_guest_root_is_mount_root() {
    let result = run("import os, sys; print(os.listdir('/') == [sys.argv[0].lstrip('/')])");
    assert_eq!(result.stdout, "True\n");
}

/// Test that host files outside the mount root are unreachable.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_filesystem_access_blocked() {
    let result = run(
        r#"
try:
    with open('/etc/passwd', 'r') as f:
        print(f.read())
    print('SECURITY_BREACH: file read succeeded')
except Exception as e:
    print(f'BLOCKED: {type(e).__name__}')
"#,
    );

    assert!(!result.stdout.contains("SECURITY_BREACH"));
    assert!(result.stdout.contains("BLOCKED"));
}

/// Test that the subprocess module cannot spawn anything.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_subprocess_blocked() {
    let result = run(
        r#"
try:
    import subprocess
    subprocess.run(['echo', 'BREACH'])
    print('SECURITY_BREACH: subprocess succeeded')
except Exception as e:
    print(f'BLOCKED: {type(e).__name__}')
"#,
    );

    assert!(!result.stdout.contains("SECURITY_BREACH"));
}

/// Test that network access is blocked.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_network_access_blocked() {
    let result = run(
        r#"
try:
    import socket
    s = socket.socket(socket.AF_INET, socket.SOCK_STREAM)
    s.connect(('8.8.8.8', 53))
    print('SECURITY_BREACH: network access succeeded')
except Exception as e:
    print(f'BLOCKED: {type(e).__name__}')
"#,
    );

    assert!(!result.stdout.contains("SECURITY_BREACH"));
}

/// Test that packages under the package mount are importable.
#[test]
#[ignore = "requires python-3.12.0.wasm"]
fn test_package_mount_import() {
    let packages = tempfile::tempdir().unwrap();
    std::fs::write(packages.path().join("greeting.py"), "WORD = 'hi'\n").unwrap();

    let result = execute(
        "import greeting; print(greeting.WORD)",
        &options().package_mount(Some(PackageMount::new(packages.path()))),
    )
    .unwrap();

    assert_eq!(result.stdout, "hi\n");
}

/// Test that concurrent executions return their own output.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires python-3.12.0.wasm"]
async fn test_concurrent_execution() {
    let executor = Executor::new();
    let (a, b) = tokio::join!(
        executor.execute_async("print('a')", options()),
        executor.execute_async("print('b')", options()),
    );

    assert_eq!(a.unwrap().stdout, "a\n");
    assert_eq!(b.unwrap().stdout, "b\n");
}
