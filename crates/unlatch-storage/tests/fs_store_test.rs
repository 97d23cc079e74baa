//! Integration test: OpendalStore over the local filesystem backend
//!
//! Exercises the same capability surface the job core uses (list, download,
//! upload, resolve destination) against a temp directory instead of S3.

use bytes::Bytes;
use std::path::Path;
use tempfile::TempDir;
use unlatch_storage::{operator::build_fs_operator, FileStore, OpendalStore};

fn write_test_file(dir: &Path, name: &str, content: &[u8]) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(&path, content).expect("write test file");
}

fn fs_store(root: &Path) -> OpendalStore {
    OpendalStore::new(build_fs_operator(root).expect("fs operator"))
        .with_include_patterns(&["*.mp4".to_string()])
        .expect("patterns")
}

#[tokio::test]
async fn lists_only_matching_files_with_sizes() {
    let tmp = TempDir::new().unwrap();
    write_test_file(tmp.path(), "cam/0002.mp4", &[7u8; 64]);
    write_test_file(tmp.path(), "cam/0001.mp4", &[7u8; 32]);
    write_test_file(tmp.path(), "cam/index.json", b"{}");
    write_test_file(tmp.path(), "cam/sub/0003.mp4", &[7u8; 8]);

    let store = fs_store(tmp.path());
    let files = store.list_files("cam").await.expect("list");

    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name, "0001.mp4");
    assert_eq!(files[0].size, 32);
    assert_eq!(files[1].name, "0002.mp4");
    assert_eq!(files[1].size, 64);
}

#[tokio::test]
async fn same_folder_destination_lands_on_disk() {
    let tmp = TempDir::new().unwrap();
    write_test_file(tmp.path(), "cam/0001.mp4", b"ciphertext");

    let store = fs_store(tmp.path());
    let dest = store.resolve_destination_folder("cam").await.expect("resolve");
    assert_eq!(dest, "cam/decrypted/");
    assert!(tmp.path().join("cam/decrypted").is_dir());

    let id = store
        .upload(&dest, "0001.mp4", Bytes::from_static(b"plaintext"), "video/mp4")
        .await
        .expect("upload");
    assert_eq!(
        std::fs::read(tmp.path().join("cam/decrypted/0001.mp4")).unwrap(),
        b"plaintext"
    );

    let back = store.download(&id).await.expect("download");
    assert_eq!(back, Bytes::from_static(b"plaintext"));

    // the output folder itself is not listed as a source file
    let files = store.list_files("cam").await.expect("list");
    assert_eq!(files.len(), 1);
}
