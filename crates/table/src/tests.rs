use super::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_components(desc: &TableDescriptor, components: &[Component]) {
    for c in components {
        fs::write(desc.component_path(*c), b"x").unwrap();
    }
}

#[test]
fn component_paths_share_base() {
    let desc = TableDescriptor::new("/data/ks", "tbl-0001");
    assert_eq!(
        desc.component_path(Component::Data),
        Path::new("/data/ks/tbl-0001-Data.db")
    );
    assert_eq!(
        desc.component_path(Component::Stats),
        Path::new("/data/ks/tbl-0001-Stats.db")
    );
}

#[test]
fn discover_component_files() {
    let dir = tempdir().unwrap();
    let desc = TableDescriptor::new(dir.path(), "tbl-0001");
    write_components(&desc, &[Component::Data, Component::Index]);

    // an unrelated file must not match
    fs::write(dir.path().join("other-0001-Data.db"), b"x").unwrap();

    let mut files = desc.component_files().unwrap();
    files.sort();
    assert_eq!(
        files,
        vec![
            desc.component_path(Component::Data),
            desc.component_path(Component::Index),
        ]
    );
}

#[test]
fn bytes_on_disk_sums_components() {
    let dir = tempdir().unwrap();
    let desc = TableDescriptor::new(dir.path(), "tbl-0002");
    fs::write(desc.component_path(Component::Data), vec![0u8; 100]).unwrap();
    fs::write(desc.component_path(Component::Index), vec![0u8; 24]).unwrap();
    assert_eq!(desc.bytes_on_disk().unwrap(), 124);
}

#[test]
fn reader_snapshots_size_at_open() {
    let dir = tempdir().unwrap();
    let desc = TableDescriptor::new(dir.path(), "tbl-0003");
    fs::write(desc.component_path(Component::Data), vec![0u8; 64]).unwrap();

    let reader = TableReader::open(desc.clone()).unwrap();
    assert_eq!(reader.bytes_on_disk(), 64);

    // growing the file afterwards does not change the snapshot
    fs::write(desc.component_path(Component::Data), vec![0u8; 256]).unwrap();
    assert_eq!(reader.bytes_on_disk(), 64);
}
