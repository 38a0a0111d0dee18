//! Disk I/O helpers: shard file naming, compression, load and atomic write.
//!
//! Everything here is blocking; the shards call into it from
//! `spawn_blocking`.
//!
//! The rename-over approach is close to atomic on most platforms. On NTFS
//! (Windows) it's reliable; on FAT32 or network shares there are no hard
//! guarantees. If that matters to you, keep backups or use a real database.

use crate::codec::{Codec, Document};
use crate::error::Result;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name for shard `index`, e.g. `shard_003.json` or `shard_003.json.gz`.
pub fn shard_file_name(index: usize, compressed: bool) -> String {
    if compressed {
        format!("shard_{index:03}.json.gz")
    } else {
        format!("shard_{index:03}.json")
    }
}

/// `<path>.tmp`, the staging file for [`atomic_write`].
pub fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

/// `<path>.corrupt`, where unreadable shard files get moved.
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, ".corrupt")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Gzip `bytes`.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Undo [`compress`].
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Reads and decodes the shard file at `path`. Returns an empty document if
/// the file is missing or empty (not an error).
///
/// A `<path>.tmp` left behind by an interrupted write is removed first; it
/// was never renamed into place, so the real file is still the last good one.
pub fn load<C: Codec>(path: &Path, compressed: bool, codec: &C) -> Result<Document> {
    remove_stale_temp(path);

    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::new()),
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() {
        return Ok(Document::new());
    }
    if compressed {
        codec.decode_map(&decompress(&bytes)?)
    } else {
        codec.decode_map(&bytes)
    }
}

/// Serialize `map` (gzipped when `compressed`) and atomically replace `path`.
pub fn save<C: Codec>(path: &Path, compressed: bool, codec: &C, map: &Document) -> Result<()> {
    let bytes = codec.encode_map(map)?;
    if compressed {
        atomic_write(path, &compress(&bytes)?)
    } else {
        atomic_write(path, &bytes)
    }
}

/// Write `bytes` to `<path>.tmp`, fsync it and then rename over `path`. This
/// avoids leaving a half-written file if the process crashes mid-write. The
/// parent directory is synced afterwards so the rename itself survives a
/// power loss.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => sync_dir(dir),
        _ => sync_dir(Path::new(".")),
    }
}

/// Flush a directory's entries (creates, renames, removes) to disk.
///
/// Directories can't be opened for syncing on Windows; there this is a no-op.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Flush a directory's entries (creates, renames, removes) to disk.
///
/// Directories can't be opened for syncing on Windows; there this is a no-op.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Get an unreadable shard file out of the way. With `keep_backup` it is
/// renamed to `<path>.corrupt` (replacing an older backup), otherwise it is
/// deleted. Returns the backup path when one was kept.
pub fn discard_corrupt(path: &Path, keep_backup: bool) -> Result<Option<PathBuf>> {
    if keep_backup {
        let backup = backup_path(path);
        fs::rename(path, &backup)?;
        return Ok(Some(backup));
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(None),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_stale_temp(path: &Path) {
    let tmp = temp_path(path);
    match fs::remove_file(&tmp) {
        Ok(()) => debug!(path = %tmp.display(), "removed stale temp file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %tmp.display(), error = %e, "could not remove stale temp file"),
    }
}
