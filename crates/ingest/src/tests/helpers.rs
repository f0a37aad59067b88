use codec::CampaignId;
use std::fs;
use std::path::{Path, PathBuf};
use store::Store;
use tempfile::TempDir;

pub fn temp_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::create(dir.path().join("db.redb")).unwrap();
    (dir, store)
}

/// Writes `lines` joined by `\n` (with a trailing newline) to `dir/name`.
pub fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut body = lines.join("\n");
    body.push('\n');
    fs::write(&path, body).unwrap();
    path
}

/// Writes a manifest pointing at `entries`.
pub fn write_manifest<P: AsRef<Path>>(dir: &Path, entries: &[(CampaignId, P)]) -> PathBuf {
    let lines: Vec<String> = entries
        .iter()
        .map(|(c, p)| format!("{c},{}", p.as_ref().display()))
        .collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    write_lines(dir, "manifest.csv", &refs)
}

/// Decoded campaigns for `device`, sorted, or `None` if absent.
pub fn campaigns(store: &Store, device: &str) -> Option<Vec<CampaignId>> {
    store.get(device.as_bytes()).unwrap().map(|raw| {
        let mut ids = codec::decode(&raw).unwrap().into_vec();
        ids.sort_unstable();
        ids
    })
}
