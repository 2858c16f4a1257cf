// tests/integration_test.rs

//! Integration tests for DPMS
//!
//! These tests drive the public API end to end: building archives, installing
//! them from disk and over HTTP, and keeping the registry in step with the
//! install root.

use dpms::archive::{self, ArchiveFormat};
use dpms::install::Inconsistency;
use dpms::packages::parse_archive_name;
use dpms::{Config, Error, InstallEngine, Version};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::{TempDir, tempdir};

/// Serve a fixed set of paths over HTTP on localhost; anything else is a 404
fn serve(routes: Vec<(&'static str, Vec<u8>)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }

            let text = String::from_utf8_lossy(&request).into_owned();
            let path = text.split_whitespace().nth(1).unwrap_or("/").to_string();
            let (status, body) = match routes.iter().find(|(p, _)| *p == path) {
                Some((_, body)) => ("200 OK", body.clone()),
                None => ("404 Not Found", b"not found".to_vec()),
            };

            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        }
    });

    base
}

/// A base URL with nothing listening behind it
fn unreachable_base() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.tar.gz");
    write_tar_gz(&path, files);
    fs::read(path).unwrap()
}

fn engine(dir: &TempDir, repository_url: String) -> InstallEngine {
    let mut config = Config::with_root(dir.path());
    config.repository_url = repository_url;
    config.repository_api_url = None;
    config.download_retries = 1;
    config.http_timeout_secs = 5;
    InstallEngine::new(config).unwrap()
}

fn offline_engine(dir: &TempDir) -> InstallEngine {
    engine(dir, unreachable_base())
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_install_list_uninstall_lifecycle() {
    let dir = tempdir().unwrap();
    let engine = offline_engine(&dir);
    let archive = dir.path().join("hello-1.0.tar.gz");
    write_tar_gz(&archive, &[("hello/bin/hello", b"#!/bin/sh\necho hi\n")]);

    let report = engine.install(path_str(&archive), None).unwrap();
    assert_eq!(report.name, "hello");
    assert_eq!(report.version, "1.0".parse::<Version>().unwrap());
    assert!(report.install_dir.join("hello/bin/hello").exists());
    assert_eq!(engine.list_installed().unwrap(), vec!["hello"]);

    // Installing again keeps a single registry entry
    engine.install(path_str(&archive), None).unwrap();
    assert_eq!(engine.list_installed().unwrap(), vec!["hello"]);

    let removed = engine.uninstall("hello").unwrap();
    assert!(removed.directory_removed);
    assert!(!report.install_dir.exists());
    assert!(engine.list_installed().unwrap().is_empty());

    // Uninstalling an absent package is fine
    let again = engine.uninstall("hello").unwrap();
    assert!(!again.directory_removed);
    assert_eq!(again.registry_entries_removed, 0);
}

#[test]
fn test_registry_survives_engine_restart() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("Persist-2.0.tar.gz");
    write_tar_gz(&archive, &[("data", b"x")]);

    offline_engine(&dir).install(path_str(&archive), None).unwrap();

    let reopened = offline_engine(&dir);
    assert_eq!(reopened.list_installed().unwrap(), vec!["Persist"]);
    assert!(reopened.registry().contains("persist").unwrap());

    let on_disk = fs::read_to_string(&reopened.config().registry_path).unwrap();
    let names: Vec<String> = serde_json::from_str(&on_disk).unwrap();
    assert_eq!(names, vec!["Persist"]);
}

#[test]
fn test_install_by_name_from_package_dir() {
    let dir = tempdir().unwrap();
    let engine = offline_engine(&dir);
    let package_dir = engine.config().package_dir.clone();
    fs::create_dir_all(&package_dir).unwrap();
    write_tar_gz(&package_dir.join("viewer-1.9.tar.gz"), &[("v", b"1.9")]);
    write_tar_gz(&package_dir.join("viewer-1.10.tar.gz"), &[("v", b"1.10")]);

    let report = engine.install("viewer", None).unwrap();

    assert_eq!(report.version.to_string(), "1.10");
    assert!(!report.downloaded);
    assert!(report.archive.exists());
    assert_eq!(fs::read(report.install_dir.join("v")).unwrap(), b"1.10");
}

#[test]
fn test_install_ghost_leaves_registry_unchanged() {
    let dir = tempdir().unwrap();
    let engine = offline_engine(&dir);
    let archive = dir.path().join("real-1.0.tar.gz");
    write_tar_gz(&archive, &[("f", b"x")]);
    engine.install(path_str(&archive), None).unwrap();

    let result = engine.install("ghost", None);

    assert!(matches!(result, Err(Error::NetworkError(_))));
    assert_eq!(engine.list_installed().unwrap(), vec!["real"]);
    assert!(!engine.install_dir("ghost").exists());
}

#[test]
fn test_install_from_url_deletes_download() {
    let dir = tempdir().unwrap();
    let base = serve(vec![(
        "/pkgs/net-tool-0.3.tar.gz",
        tar_gz_bytes(&[("net-tool", b"binary")]),
    )]);
    let engine = engine(&dir, unreachable_base());

    let report = engine
        .install(&format!("{}/pkgs/net-tool-0.3.tar.gz", base), None)
        .unwrap();

    assert_eq!(report.name, "net-tool");
    assert!(report.downloaded);
    assert!(report.archive.starts_with(&engine.config().download_dir));
    assert!(!report.archive.exists());
    assert_eq!(
        fs::read(report.install_dir.join("net-tool")).unwrap(),
        b"binary"
    );
}

#[test]
fn test_install_from_url_not_found() {
    let dir = tempdir().unwrap();
    let base = serve(vec![]);
    let engine = engine(&dir, unreachable_base());

    let result = engine.install(&format!("{}/missing-1.0.tar.gz", base), None);

    assert!(matches!(result, Err(Error::NetworkError(_))));
    assert!(engine.list_installed().unwrap().is_empty());
}

#[test]
fn test_install_by_convention_url() {
    let dir = tempdir().unwrap();
    let base = serve(vec![(
        "/main/fmt-4.2.tar.gz",
        tar_gz_bytes(&[("fmt.h", b"header")]),
    )]);
    let engine = engine(&dir, format!("{}/main/", base));

    let report = engine.install("fmt-4.2", None).unwrap();

    assert_eq!(report.name, "fmt");
    assert_eq!(report.version, Version::new(vec![4, 2]));
    assert!(!report.archive.exists());
}

#[test]
fn test_unparseable_archive_name() {
    let dir = tempdir().unwrap();
    let engine = offline_engine(&dir);
    let archive = dir.path().join("release.tar.gz");
    write_tar_gz(&archive, &[("f", b"x")]);

    let result = engine.install(path_str(&archive), None);

    assert!(matches!(result, Err(Error::ArchiveError(_))));
    assert!(engine.list_installed().unwrap().is_empty());
}

#[test]
fn test_text_file_is_not_an_archive() {
    let dir = tempdir().unwrap();
    let text = dir.path().join("notes.txt");
    fs::write(&text, "plain text, definitely not a tarball\n").unwrap();

    assert_eq!(archive::detect(&text).unwrap(), ArchiveFormat::Unknown);

    let dest = dir.path().join("out");
    let result = archive::extract(&text, &dest, None);
    assert!(matches!(result, Err(Error::ArchiveError(_))));
    assert!(!dest.exists());
}

#[test]
fn test_corrupt_registry_blocks_install() {
    let dir = tempdir().unwrap();
    let engine = offline_engine(&dir);
    let archive = dir.path().join("blocked-1.0.tar.gz");
    write_tar_gz(&archive, &[("f", b"x")]);

    let registry_path = engine.config().registry_path.clone();
    fs::create_dir_all(registry_path.parent().unwrap()).unwrap();
    fs::write(&registry_path, "[\"unterminated").unwrap();

    let result = engine.install(path_str(&archive), None);

    assert!(matches!(result, Err(Error::CorruptRegistry { .. })));
    assert!(!engine.install_dir("blocked").exists());
    assert_eq!(fs::read_to_string(&registry_path).unwrap(), "[\"unterminated");
}

#[test]
fn test_check_consistency_reports_drift() {
    let dir = tempdir().unwrap();
    let engine = offline_engine(&dir);
    let archive = dir.path().join("drift-1.0.tar.gz");
    write_tar_gz(&archive, &[("f", b"x")]);
    let report = engine.install(path_str(&archive), None).unwrap();

    fs::remove_dir_all(&report.install_dir).unwrap();
    fs::create_dir_all(engine.config().install_root.join("handmade")).unwrap();

    let issues = engine.check_consistency().unwrap();
    assert_eq!(
        issues,
        vec![
            Inconsistency::MissingDirectory("drift".to_string()),
            Inconsistency::UnregisteredDirectory("handmade".to_string()),
        ]
    );
}

#[test]
fn test_compress_round_trip_gz_and_xz() {
    let dir = tempdir().unwrap();
    let engine = offline_engine(&dir);
    let source = dir.path().join("project");
    fs::create_dir_all(source.join("src/nested")).unwrap();
    fs::create_dir_all(source.join("empty")).unwrap();
    fs::write(source.join("README.md"), "# Project").unwrap();
    fs::write(source.join("src/nested/lib.rs"), "pub fn f() {}").unwrap();

    for (compression, format) in [("gz", ArchiveFormat::TarGz), ("XZ", ArchiveFormat::TarXz)] {
        let output = dir.path().join(format!("dist-{}/project-1.0", compression));
        let archive_path = engine.compress(&source, &output, compression, None).unwrap();
        assert_eq!(archive::detect(&archive_path).unwrap(), format);

        let dest: PathBuf = dir.path().join(format!("unpacked-{}", compression));
        assert_eq!(archive::extract(&archive_path, &dest, None).unwrap(), format);

        assert_eq!(
            fs::read_to_string(dest.join("project/README.md")).unwrap(),
            "# Project"
        );
        assert_eq!(
            fs::read_to_string(dest.join("project/src/nested/lib.rs")).unwrap(),
            "pub fn f() {}"
        );
        assert!(dest.join("project/empty").is_dir());
    }
}

#[test]
fn test_compress_errors() {
    let dir = tempdir().unwrap();
    let engine = offline_engine(&dir);

    let missing = engine.compress(&dir.path().join("nope"), &dir.path().join("out"), "gz", None);
    assert!(matches!(missing, Err(Error::InvalidSourceError(_))));

    fs::write(dir.path().join("file"), "x").unwrap();
    let bad = engine.compress(&dir.path().join("file"), &dir.path().join("out"), "bz2", None);
    assert!(matches!(bad, Err(Error::UnsupportedCompressionError(_))));
}

#[test]
fn test_archive_name_grammar() {
    let parsed = parse_archive_name("myapp-1.2.3.tar.gz").unwrap();
    assert_eq!(parsed.name, "myapp");
    assert_eq!(parsed.version, Version::new(vec![1, 2, 3]));
    assert!(parse_archive_name("bad name.zip").is_none());

    let v = |s: &str| s.parse::<Version>().unwrap();
    assert_eq!(v("1.2"), v("1.2.0"));
    assert!(v("1.3") > v("1.2.9"));
}

#[test]
fn test_config_reset_keeps_installs() {
    let dir = tempdir().unwrap();
    let engine = offline_engine(&dir);
    let archive = dir.path().join("keep-1.0.tar.gz");
    write_tar_gz(&archive, &[("f", b"x")]);
    engine.install(path_str(&archive), None).unwrap();

    let config = engine.config().clone();
    fs::create_dir_all(&config.download_dir).unwrap();
    let config_path = dir.path().join("config.toml");
    config.save(&config_path).unwrap();

    assert!(config.reset(Some(&config_path)).unwrap());
    assert!(!config.download_dir.exists());
    assert!(!config_path.exists());
    assert_eq!(engine.list_installed().unwrap(), vec!["keep"]);
}
