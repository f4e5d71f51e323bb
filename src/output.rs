use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use rand::RngCore;

/// Route prefix under which stored outputs are served.
pub const OUTPUT_ROUTE: &str = "/static/output/";

/// Directory of annotated results, addressed by random hex names.
#[derive(Clone, Debug)]
pub struct OutputStore {
    dir: PathBuf,
    public_base_url: String,
}

impl OutputStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: &str) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        Ok(Self {
            dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a fresh `<hex>.<ext>` name and its path. Nothing is written yet.
    pub fn allocate(&self, ext: &str) -> (String, PathBuf) {
        let name = format!("{}.{}", random_hex(), ext);
        let path = self.dir.join(&name);
        (name, path)
    }

    /// Write `bytes` under a fresh name and return that name.
    pub fn save(&self, bytes: &[u8], ext: &str) -> Result<String> {
        let (name, path) = self.allocate(ext);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write output {}", path.display()))?;
        Ok(name)
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}{}{}", self.public_base_url, OUTPUT_ROUTE, name)
    }

    /// URL with a cache buster, for outputs browsers tend to hold on to.
    pub fn fresh_url_for(&self, name: &str) -> String {
        format!("{}?t={}", self.url_for(name), random_hex())
    }

    /// Map a requested name to a stored file. Only names this store generates
    /// are accepted.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        static NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
        let re = NAME_RE.get_or_init(|| {
            regex::Regex::new(r"^[0-9a-f]{32}\.(jpg|mp4)$").expect("output name pattern")
        });
        if !re.is_match(name) {
            return Err(anyhow!("invalid output name"));
        }
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(anyhow!("output not found"));
        }
        Ok(path)
    }

    /// Best-effort removal of a partial output.
    pub fn discard(&self, path: &Path) {
        if path.exists() {
            if let Err(err) = std::fs::remove_file(path) {
                log::warn!("failed to remove partial output {}: {}", path.display(), err);
            }
        }
    }
}

pub fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".mp4") {
        "video/mp4"
    } else if name.ends_with(".jpg") {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}

fn random_hex() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn saved_outputs_resolve_and_have_urls() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path().join("out"), "http://example.test/").unwrap();
        let name = store.save(b"jpeg", "jpg").unwrap();
        assert_eq!(name.len(), 36);
        assert_eq!(
            store.url_for(&name),
            format!("http://example.test/static/output/{name}")
        );
        assert!(store.fresh_url_for(&name).contains("?t="));
        assert_eq!(std::fs::read(store.resolve(&name).unwrap()).unwrap(), b"jpeg");
        assert_eq!(content_type_for(&name), "image/jpeg");
    }

    #[test]
    fn resolve_rejects_traversal_and_unknown_names() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path(), "http://localhost:8000").unwrap();
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("index.html").is_err());
        assert!(store
            .resolve("0123456789abcdef0123456789abcdef.jpg")
            .is_err());
    }

    #[test]
    fn discard_removes_partial_file() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path(), "http://localhost:8000").unwrap();
        let (_, path) = store.allocate("mp4");
        std::fs::write(&path, b"partial").unwrap();
        store.discard(&path);
        assert!(!path.exists());
    }
}
