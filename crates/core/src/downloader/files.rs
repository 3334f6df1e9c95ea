use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::parser::{parse_release_name, VIDEO_EXTENSIONS};

/// Find the payload file for `episode` at a torrent's location.
///
/// A plain file is the payload. For a folder torrent, the video whose name
/// parses to `episode` wins (largest if several); a folder holding exactly
/// one video falls back to that video. `None` means nothing usable yet.
pub async fn resolve_artifact(location: &Path, episode: u32) -> io::Result<Option<PathBuf>> {
    let meta = match fs::metadata(location).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if meta.is_file() {
        return Ok(Some(location.to_path_buf()));
    }

    let root = location.to_path_buf();
    tokio::task::spawn_blocking(move || find_episode(&root, episode))
        .await
        .map_err(io::Error::other)
}

fn find_episode(root: &Path, episode: u32) -> Option<PathBuf> {
    let videos: Vec<(PathBuf, u64)> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| {
            let size = e.metadata().map(|m| m.len()).unwrap_or(0);
            (e.into_path(), size)
        })
        .collect();

    let matching = videos
        .iter()
        .filter(|(path, _)| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| parse_release_name(n).episode)
                == Some(episode)
        })
        .max_by_key(|(_, size)| *size);

    match (matching, videos.as_slice()) {
        (Some((path, _)), _) => Some(path.clone()),
        (None, [(only, _)]) => Some(only.clone()),
        _ => None,
    }
}

/// False when the directory holding `path` cannot be listed.
pub(crate) async fn parent_readable(path: &Path) -> bool {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::read_dir(parent).await.is_ok(),
        _ => true,
    }
}

/// Move `source` to `destination`, copying across filesystems.
pub async fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        // EXDEV is 18 on Linux
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) => {
            fs::copy(source, destination).await?;
            fs::remove_file(source).await
        }
        Err(e) => Err(e),
    }
}

/// Leave a symlink at `link` pointing to `target`.
#[cfg(unix)]
pub(crate) async fn link_back(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(not(unix))]
pub(crate) async fn link_back(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are only created on unix",
    ))
}
