//! `rankd inspect` against real stores.

use rankd::storage::{Directory, FsDirectory};
use rankd::{Bucket, RankSet};
use std::process::Command;
use std::sync::Arc;

fn inspect(data_dir: &std::path::Path, extra: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_rankd"))
        .arg("--data-dir")
        .arg(data_dir)
        .arg("inspect")
        .args(extra)
        .env_remove("RANKD_BUCKET")
        .env("RANKD_LOG", "off")
        .output()
        .unwrap()
}

#[test]
fn missing_store_fails_without_creating_it() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nope");

    let out = inspect(&missing, &[]);
    assert!(!out.status.success());
    assert!(!missing.exists());
}

#[test]
fn missing_bucket_fails_without_creating_it() {
    let tmp = tempfile::tempdir().unwrap();

    let out = inspect(tmp.path(), &[]);
    assert!(!out.status.success());
    assert!(!tmp.path().join("RANKING").exists());
}

#[test]
fn lists_sets_and_entries() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path()).unwrap());
        let bucket = Bucket::open_or_create(dir, "RANKING").unwrap();
        let set = RankSet::new();
        set.update(1, 100);
        set.update(2, 200);
        bucket.put("global", &set.marshal().unwrap()).unwrap();
    }

    let out = inspect(tmp.path(), &[]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "global\t2\n");

    let out = inspect(tmp.path(), &["--name", "global"]);
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8(out.stdout).unwrap(),
        "1\t2\t200\n2\t1\t100\n"
    );
}
