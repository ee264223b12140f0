use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::tempdir;
use zip::write::SimpleFileOptions;

use docship::archive::{extract_archive, ArchiveError};

/// Archive fixture layout: one top-level folder holding all members, the way
/// package tarballs are produced.
fn tar_members(builder: &mut tar::Builder<impl Write>, root: &str, files: &[(&str, &[u8])]) {
    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_size(0);
    dir.set_mode(0o755);
    builder
        .append_data(&mut dir, format!("{root}/"), std::io::empty())
        .unwrap();

    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, format!("{root}/{name}"), *content)
            .unwrap();
    }
}

fn build_targz(path: &Path, root: &str, files: &[(&str, &[u8])]) {
    let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    tar_members(&mut builder, root, files);
    builder.into_inner().unwrap().finish().unwrap();
}

fn build_tar(path: &Path, root: &str, files: &[(&str, &[u8])]) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());
    tar_members(&mut builder, root, files);
    builder.into_inner().unwrap();
}

fn build_zip(path: &Path, root: &str, files: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    writer.add_directory(format!("{root}/"), options).unwrap();
    for (name, content) in files {
        writer
            .start_file(format!("{root}/{name}"), options)
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn targz_flattens_into_a_fresh_attachments_directory() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("widget-1.0.0.tar.gz");
    let dest = tmp.path().join("vendor/widget");
    build_targz(
        &archive,
        "widget-1.0.0",
        &[
            ("widget.js", b"var widget = {};".as_slice()),
            ("css/widget.css", b".widget { }".as_slice()),
        ],
    );

    // A stale previous installation must be discarded.
    fs::create_dir_all(dest.join("_attachments")).unwrap();
    fs::write(dest.join("_attachments/stale.txt"), b"old").unwrap();

    extract_archive(&archive, &dest, None).unwrap();

    assert_eq!(
        fs::read(dest.join("_attachments/widget.js")).unwrap(),
        b"var widget = {};"
    );
    assert_eq!(
        fs::read(dest.join("_attachments/css/widget.css")).unwrap(),
        b".widget { }"
    );
    assert!(!dest.join("_attachments/stale.txt").exists());
    assert!(!dest.join("widget-1.0.0").exists(), "extracted folder must be removed");
}

#[test]
fn plain_tar_is_detected_and_extracted() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("widget.tar");
    let dest = tmp.path().join("out");
    build_tar(&archive, "widget-2.0.0", &[("main.js", b"1;".as_slice())]);

    extract_archive(&archive, &dest, None).unwrap();
    assert!(dest.join("_attachments/main.js").exists());
}

#[test]
fn zip_flattens_into_attachments_too() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("widget.zip");
    let dest = tmp.path().join("out");
    build_zip(
        &archive,
        "widget-3.1.4",
        &[
            ("widget.js", b"var w;".as_slice()),
            ("doc/readme.txt", b"docs".as_slice()),
        ],
    );

    extract_archive(&archive, &dest, None).unwrap();
    assert_eq!(fs::read(dest.join("_attachments/widget.js")).unwrap(), b"var w;");
    assert_eq!(
        fs::read(dest.join("_attachments/doc/readme.txt")).unwrap(),
        b"docs"
    );
    assert!(!dest.join("widget-3.1.4").exists());
}

#[test]
fn suffix_filter_limits_what_gets_extracted() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("widget.tar.gz");
    let dest = tmp.path().join("out");
    build_targz(
        &archive,
        "widget-1.0.0",
        &[
            ("widget.js", b"var w;".as_slice()),
            ("readme.md", b"# widget".as_slice()),
        ],
    );

    let filter = vec![".js".to_string()];
    extract_archive(&archive, &dest, Some(&filter)).unwrap();
    assert!(dest.join("_attachments/widget.js").exists());
    assert!(!dest.join("_attachments/readme.md").exists());
}

#[test]
fn zip_honors_the_suffix_filter() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("widget.zip");
    let dest = tmp.path().join("out");
    build_zip(
        &archive,
        "widget-1.0.0",
        &[
            ("widget.js", b"var w;".as_slice()),
            ("notes.txt", b"hi".as_slice()),
        ],
    );

    let filter = vec![".js".to_string()];
    extract_archive(&archive, &dest, Some(&filter)).unwrap();
    assert!(dest.join("_attachments/widget.js").exists());
    assert!(!dest.join("_attachments/notes.txt").exists());
}

#[test]
fn garbage_is_rejected_as_unrecognized() {
    let tmp = tempdir().unwrap();
    let not_an_archive = tmp.path().join("package.tar.gz");
    fs::write(&not_an_archive, b"<html>404 not found</html>").unwrap();

    let result = extract_archive(&not_an_archive, &tmp.path().join("out"), None);
    assert!(matches!(
        result,
        Err(ArchiveError::UnrecognizedFormat { .. })
    ));
}
