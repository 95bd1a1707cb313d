//! Integration tests for the external load-order file
//!
//! These tests verify that LoadOrderFile:
//! - Materializes active sets with the original header and prefix style
//! - Writes the final order with core plugins first
//! - Keeps removal markers from earlier sessions exactly once

use camino::Utf8PathBuf;
use crashbisect::models::{LoadOrder, QuarantineDisposition};
use crashbisect::services::{LoadOrderFile, LoadOrderFileError, REMOVED_SECTION};
use std::fs;
use tempfile::TempDir;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn write_plugin_file(content: &str) -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let path = root.join("plugins.txt");
    fs::write(&path, content).unwrap();
    (temp_dir, path)
}

#[test]
fn test_read_missing_file() {
    let err = LoadOrderFile::read("/nonexistent/plugins.txt").unwrap_err();
    assert!(matches!(err, LoadOrderFileError::Read { .. }));
    assert!(err.to_string().contains("/nonexistent/plugins.txt"));
}

#[test]
fn test_write_active_keeps_star_prefix() {
    let (_temp_dir, path) = write_plugin_file("# This file is used by the game\n*A.esm\n*B.esp\n*C.esp\n");
    let file = LoadOrderFile::read(&path).unwrap();

    // A single-# line before any entry is an inactive entry, not a header.
    assert!(file.header().is_empty());
    assert!(file.uses_star_prefix());

    file.write_active(&names(&["A.esm", "C.esp"])).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "*A.esm\n*C.esp\n");
}

#[test]
fn test_write_active_plain_style() {
    let (_temp_dir, path) = write_plugin_file("## Header line\nA.esm\nB.esp\n");
    let file = LoadOrderFile::read(&path).unwrap();

    file.write_active(&names(&["A.esm"])).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "## Header line\nA.esm\n");
}

#[test]
fn test_final_order_puts_core_first() {
    let (_temp_dir, path) = write_plugin_file("B.esp\nOpt.esp\nA.esm\nC.esp\n");
    let file = LoadOrderFile::read(&path).unwrap();
    let mut lo = LoadOrder::new(file.entries(), &names(&["A.esm"]), &names(&["Opt.esp"]), &[]);
    lo.mark_passed(&names(&["A.esm", "Opt.esp", "B.esp", "C.esp"]))
        .unwrap();

    let content = file.write_final(&lo, "CRASHBISECT", "2025-05-01 10:00:00").unwrap();

    assert_eq!(content, "A.esm\nOpt.esp\nB.esp\nC.esp\n");
    assert_eq!(fs::read_to_string(&path).unwrap(), content);
}

#[test]
fn test_final_comments_failed_plugins() {
    let (_temp_dir, path) = write_plugin_file("A.esm\nB.esp\nC.esp\n#Off.esp\n");
    let file = LoadOrderFile::read(&path).unwrap();
    let mut lo = LoadOrder::new(file.entries(), &names(&["A.esm"]), &[], &[]);
    lo.mark_passed(&names(&["A.esm", "B.esp"])).unwrap();
    lo.mark_failed(&names(&["C.esp"])).unwrap();

    let content = file.write_final(&lo, "CRASHBISECT", "2025-05-01 10:00:00").unwrap();

    assert_eq!(
        content,
        format!(
            "A.esm\nB.esp\n#Off.esp\n\n{}\n#C.esp #REMOVED BY CRASHBISECT (2025-05-01 10:00:00)\n",
            REMOVED_SECTION
        )
    );
}

#[test]
fn test_existing_markers_preserved_once() {
    let (_temp_dir, path) = write_plugin_file(
        "A.esm\nB.esp\n\n##REMOVED PLUGINS##\n#Old.esp #REMOVED BY OldTool (2024-12-24 08:00:00)\n",
    );
    let file = LoadOrderFile::read(&path).unwrap();
    let mut lo = LoadOrder::new(file.entries(), &names(&["A.esm"]), &[], &[]);
    lo.mark_failed(&names(&["B.esp"])).unwrap();

    // Simulate a launch overwriting the file mid-session.
    file.write_active(&names(&["A.esm"])).unwrap();

    let first = file.write_final(&lo, "CRASHBISECT", "2025-05-01 10:00:00").unwrap();
    let second = file.write_final(&lo, "CRASHBISECT", "2025-05-01 10:00:00").unwrap();

    assert_eq!(first, second);
    assert_eq!(first.matches("#Old.esp #REMOVED BY OldTool").count(), 1);
    assert_eq!(first.matches(REMOVED_SECTION).count(), 1);
    assert!(first.ends_with("#B.esp #REMOVED BY CRASHBISECT (2025-05-01 10:00:00)\n"));
}

#[test]
fn test_relocated_plugins_leave_no_trace() {
    let (_temp_dir, path) = write_plugin_file("A.esm\nB.esp\nC.esp\n");
    let file = LoadOrderFile::read(&path).unwrap();
    let mut lo = LoadOrder::new(file.entries(), &names(&["A.esm"]), &[], &[]);
    lo.mark_failed(&names(&["C.esp"])).unwrap();
    lo.mark_quarantined("C.esp", QuarantineDisposition::Relocated)
        .unwrap();

    let content = file.write_final(&lo, "CRASHBISECT", "2025-05-01 10:00:00").unwrap();

    // Untested plugins stay active.
    assert_eq!(content, "A.esm\nB.esp\n");
}
