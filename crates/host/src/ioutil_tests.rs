// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn write_atomic_creates_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested/deep/file.json");

    write_atomic(&target, b"{}").unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), b"{}");
}

#[test]
fn write_atomic_replaces_existing() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("file");
    std::fs::write(&target, b"old").unwrap();

    write_atomic(&target, b"new").unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), b"new");
}

#[test]
fn empty_or_missing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(is_empty_or_missing(&dir.path().join("nope")).unwrap());
    assert!(is_empty_or_missing(dir.path()).unwrap());

    std::fs::write(dir.path().join("x"), b"").unwrap();
    assert!(!is_empty_or_missing(dir.path()).unwrap());
}

#[test]
fn copy_dir_honours_exclusions() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("keep.txt"), b"k").unwrap();
    std::fs::create_dir(src.path().join(".git")).unwrap();
    std::fs::write(src.path().join(".git/config"), b"g").unwrap();
    std::fs::create_dir(src.path().join("sub")).unwrap();
    // Exclusions apply at the top level only
    std::fs::create_dir(src.path().join("sub/.git")).unwrap();
    std::fs::write(src.path().join("sub/.git/inner"), b"i").unwrap();

    let out = dst.path().join("copy");
    copy_dir(src.path(), &out, &[".git"]).unwrap();

    assert!(out.join("keep.txt").is_file());
    assert!(!out.join(".git").exists());
    assert!(out.join("sub/.git/inner").is_file());
}

#[test]
fn sentinel_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    assert!(!has_sentinel(dir.path()));

    write_sentinel(dir.path(), b"{\"id\":\"ins-1\"}").unwrap();
    assert!(has_sentinel(dir.path()));

    let contents = consume_sentinel(dir.path()).unwrap();
    assert_eq!(contents.as_deref(), Some("{\"id\":\"ins-1\"}"));
    assert!(!has_sentinel(dir.path()));

    // Consuming twice reports nothing to consume
    assert!(consume_sentinel(dir.path()).unwrap().is_none());
}
