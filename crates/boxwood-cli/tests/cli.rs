//! Black-box tests of the `boxwood` binary.
//!
//! Most tests only touch a temporary state root and run unprivileged. The
//! box lifecycle test needs root and a statically linked busybox, passed
//! as `BOXWOOD_TEST_BUSYBOX`; it is skipped otherwise.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;

fn boxwood(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_boxwood"))
        .arg("--root")
        .arg(root)
        .arg("--cgroup-root")
        .arg(root.join("cgroup"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run boxwood")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn rootfs_tarball(dir: &Path) -> std::path::PathBuf {
    let archive = dir.join("rootfs.tar");
    let file = std::fs::File::create(&archive).expect("create archive");
    let mut builder = tar::Builder::new(file);
    let data = b"hello from the image\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "etc/motd", &data[..])
        .expect("append");
    builder.finish().expect("finish");
    archive
}

#[test]
fn ps_on_a_fresh_root_prints_only_the_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = boxwood(dir.path(), &["ps"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim_end(), "ID  NAME  PID  STATUS  COMMAND  CREATED");
}

#[test]
fn logs_of_unknown_box_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = boxwood(dir.path(), &["logs", "ghost"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("box not found: ghost"));
}

#[test]
fn rm_of_unknown_box_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = boxwood(dir.path(), &["rm", "ghost"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("box not found: ghost"));
}

#[test]
fn exec_in_unknown_box_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = boxwood(dir.path(), &["exec", "ghost", "true"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("box not found: ghost"));
}

#[test]
fn network_ls_on_a_fresh_root_is_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = boxwood(dir.path(), &["network", "ls"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim_end(), "NAME  IpRange  Driver");
}

#[test]
fn image_import_then_list() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("state");
    let archive = rootfs_tarball(dir.path());
    let archive = archive.to_str().expect("utf-8 path");

    let out = boxwood(&root, &["image", "import", archive, "tiny"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(
        std::fs::read_to_string(root.join("image/tiny/etc/motd")).expect("motd"),
        "hello from the image\n"
    );

    let out = boxwood(&root, &["image", "ls"]);
    assert!(stdout(&out).lines().any(|l| l.starts_with("tiny ")));

    let out = boxwood(
        &root,
        &["image", "import", archive, "other", "--sha256", &"0".repeat(64)],
    );
    assert!(!out.status.success());
    assert!(stderr(&out).contains("hash mismatch"));
    assert!(!root.join("image/other").exists());
}

#[test]
fn box_lifecycle_end_to_end() {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("Skipping box lifecycle test: requires root");
        return;
    }
    let Some(busybox) = std::env::var_os("BOXWOOD_TEST_BUSYBOX") else {
        eprintln!("Skipping box lifecycle test: BOXWOOD_TEST_BUSYBOX not set");
        return;
    };

    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    let bin = root.join("image/bb/bin");
    std::fs::create_dir_all(&bin).expect("mkdir");
    let _ = std::fs::copy(&busybox, bin.join("busybox")).expect("copy busybox");
    for applet in ["sh", "echo", "sleep", "cat", "env"] {
        std::os::unix::fs::symlink("busybox", bin.join(applet)).expect("symlink");
    }
    // The init pipe carries a space-joined command, so anything needing
    // shell quoting goes into a script.
    let greet = bin.join("greet");
    std::fs::write(&greet, "#!/bin/sh\necho started\nexec sleep 30\n").expect("script");
    std::fs::set_permissions(&greet, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let out = boxwood(root, &["run", "-i", "--name", "fg", "bb", "echo", "hello"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "hello\n");
    assert!(!root.join("box/fg").exists());

    let out = boxwood(
        root,
        &["run", "--name", "bg", "-m", "64m", "-e", "GREETING=hi", "bb", "greet"],
    );
    assert!(out.status.success(), "{}", stderr(&out));
    let id = stdout(&out).trim().to_string();
    let limit = root.join("cgroup/memory").join(&id).join("memory.limit_in_bytes");
    assert_eq!(std::fs::read_to_string(limit).expect("memory limit"), "64m");
    std::thread::sleep(Duration::from_millis(500));

    let out = boxwood(root, &["logs", "bg"]);
    assert_eq!(stdout(&out), "started\n");

    let out = boxwood(root, &["exec", "bg", "env"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).lines().any(|l| l == "GREETING=hi"));
    let out = boxwood(root, &["exec", "bg", "sh", "-c", "echo $GREETING; exit 3"]);
    assert_eq!(out.status.code(), Some(3));
    assert_eq!(stdout(&out), "hi\n");

    let out = boxwood(root, &["ps", "--running"]);
    assert!(stdout(&out).lines().any(|l| l.contains(" bg ")));

    let out = boxwood(root, &["rm", "bg"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("stop it first"));

    let out = boxwood(root, &["stop", "bg"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let out = boxwood(root, &["exec", "bg", "true"]);
    assert!(stderr(&out).contains("is not running"));
    let out = boxwood(root, &["rm", "bg"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(!root.join("box/bg").exists());
    assert!(!root.join("writable/bg").exists());
}
