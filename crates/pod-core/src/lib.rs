use anyhow::{anyhow, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path};

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| anyhow!("create_dir_failed: {}: {}", path.display(), e))
}

pub fn remove_path_if_exists(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(anyhow!("stat_failed: {}: {}", path.display(), e)),
    };
    let res = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    res.map_err(|e| anyhow!("remove_failed: {}: {}", path.display(), e))?;
    Ok(true)
}

/// True when `path` lexically resolves to a filesystem root, e.g. `/`,
/// `/tmp/..` or `C:\`. A relative path whose `..` segments climb to or above
/// its starting directory counts as well.
pub fn is_filesystem_root(path: &Path) -> bool {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir if depth > 0 => depth -= 1,
            Component::ParentDir if path.has_root() => {}
            Component::ParentDir => return true,
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    depth == 0
}

/// Readers see either the previous contents or `bytes`, never a partial
/// write.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    ensure_dir(dir)?;
    let mut staged = tempfile::Builder::new()
        .prefix(".podsim-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| anyhow!("stage_failed: {}: {}", dir.display(), e))?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|e| anyhow!("persist_failed: {}: {}", path.display(), e.error))?;
    Ok(())
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write_bytes(path, &bytes)
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| anyhow!("open_failed: {}: {}", path.display(), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remove_path_handles_dirs_files_and_missing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("tree");
        ensure_dir(&dir.join("a").join("b")).expect("mkdir");
        fs::write(dir.join("a").join("b").join("f.txt"), "x").expect("write");
        assert!(remove_path_if_exists(&dir).expect("remove dir"));
        assert!(!dir.exists());

        let file = tmp.path().join("plain");
        fs::write(&file, "x").expect("write");
        assert!(remove_path_if_exists(&file).expect("remove file"));
        assert!(!file.exists());

        assert!(!remove_path_if_exists(&tmp.path().join("nope")).expect("missing ok"));
    }

    #[test]
    fn filesystem_root_detection() {
        assert!(is_filesystem_root(Path::new("/")));
        assert!(is_filesystem_root(Path::new("")));
        assert!(is_filesystem_root(Path::new("/.")));
        assert!(is_filesystem_root(Path::new("/..")));
        assert!(is_filesystem_root(Path::new("/tmp/..")));
        assert!(is_filesystem_root(Path::new("/tmp/../..")));
        assert!(is_filesystem_root(Path::new("/tmp/./sim/../..")));
        assert!(is_filesystem_root(Path::new("sandbox/../..")));
        assert!(!is_filesystem_root(Path::new("/tmp/../var/podsim")));
        assert!(!is_filesystem_root(Path::new("/../tmp/podsim")));
        assert!(!is_filesystem_root(Path::new("/tmp/podsim")));
        assert!(!is_filesystem_root(Path::new("sandbox")));
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("nested").join("state.json");
        atomic_write_json_pretty(&path, &json!({"phase": "one"})).expect("first");
        atomic_write_json_pretty(&path, &json!({"phase": "two"})).expect("second");
        let v: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(v["phase"], "two");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind");
    }

    #[test]
    fn file_digest_is_prefixed_hex_sha256() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let empty = tmp.path().join("empty");
        fs::write(&empty, b"").expect("write");
        assert_eq!(
            sha256_file(&empty).expect("digest"),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let blob = tmp.path().join("blob");
        fs::write(&blob, vec![7u8; 20_000]).expect("write");
        let digest = sha256_file(&blob).expect("digest");
        assert_eq!(digest.len(), "sha256:".len() + 64);
        assert_ne!(digest, sha256_file(&empty).expect("digest"));
    }
}
