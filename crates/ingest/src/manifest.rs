/// Input descriptors: the bulk load manifest and incremental update files.
///
/// Manifest lines are `campaignID,filePath`. Update files are named
/// `<campaignID>.<ext>`, so the campaign comes from the file name.
use anyhow::{anyhow, bail, Context, Result};
use codec::CampaignId;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One campaign and the file listing its devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub campaign: CampaignId,
    pub path: PathBuf,
}

/// Reads and validates a whole manifest before anything is loaded.
///
/// Blank lines are ignored. A line without a comma, with an unparsable
/// campaign or with an empty path fails the whole manifest.
pub fn parse_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<ManifestEntry>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening manifest {}", path.display()))?;

    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading manifest {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = parse_manifest_line(&line)
            .with_context(|| format!("{}:{}: invalid manifest line", path.display(), idx + 1))?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Parses one `campaignID,filePath` line.
pub fn parse_manifest_line(line: &str) -> Result<ManifestEntry> {
    let (campaign, file) = line
        .split_once(',')
        .ok_or_else(|| anyhow!("expected `campaignID,filePath`, got {line:?}"))?;
    let campaign = parse_campaign(campaign)?;
    let file = file.trim();
    if file.is_empty() {
        bail!("missing file path for campaign {campaign}");
    }
    Ok(ManifestEntry {
        campaign,
        path: PathBuf::from(file),
    })
}

fn parse_campaign(raw: &str) -> Result<CampaignId> {
    raw.trim()
        .parse()
        .with_context(|| format!("invalid campaign id {:?}", raw.trim()))
}

/// A diff file whose lines are devices to add to (or remove from) one
/// campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFile {
    pub campaign: CampaignId,
    pub path: PathBuf,
}

impl UpdateFile {
    /// Derives the campaign from a `<campaignID>.<ext>` file name.
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("update file {} has no usable name", path.display()))?;
        let stem = name.split('.').next().unwrap_or(name);
        let campaign = parse_campaign(stem)
            .with_context(|| format!("update file {}", path.display()))?;
        Ok(Self { campaign, path })
    }
}

/// Lists every `*.{ext}` file directly inside `dir`, ordered by file name.
pub fn discover_updates<P: AsRef<Path>>(dir: P, ext: &str) -> Result<Vec<UpdateFile>> {
    let dir = dir.as_ref();
    let listing = || format!("listing update directory {}", dir.display());
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(listing)? {
        let path = entry.with_context(listing)?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            paths.push(path);
        }
    }
    paths.sort();

    paths.into_iter().map(UpdateFile::from_path).collect()
}
