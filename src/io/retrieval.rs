//! Fetching a tile's per-date rasters into a local directory

use crate::types::{HunterError, HunterResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which requested files arrived
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalReport {
    pub retrieved: Vec<String>,
    pub missing: Vec<String>,
}

impl RetrievalReport {
    pub fn retrieved_set(&self) -> HashSet<String> {
        self.retrieved.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.retrieved.is_empty()
    }
}

/// Source of archived raster products
pub trait Retriever {
    /// Copy every file in `names` that the source holds into `dest`.
    /// Files the source does not have are reported, not treated as errors.
    fn retrieve(&self, names: &[String], dest: &Path) -> HunterResult<RetrievalReport>;
}

/// Products stored under a local or mounted archive root
#[derive(Debug, Clone)]
pub struct ArchiveRetriever {
    root: PathBuf,
}

impl ArchiveRetriever {
    pub fn new<P: AsRef<Path>>(root: P) -> HunterResult<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(HunterError::Config(format!("Archive root {} is not a directory", root.display())));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name -> path for everything below the root (first hit wins)
    fn index(&self, wanted: &HashSet<&str>) -> HunterResult<HashMap<String, PathBuf>> {
        let mut found = HashMap::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .collect();
            entries.sort();

            for path in entries {
                if path.is_dir() {
                    pending.push(path);
                } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if wanted.contains(name) && !found.contains_key(name) {
                        found.insert(name.to_string(), path.clone());
                    }
                }
            }
        }

        Ok(found)
    }
}

impl Retriever for ArchiveRetriever {
    fn retrieve(&self, names: &[String], dest: &Path) -> HunterResult<RetrievalReport> {
        std::fs::create_dir_all(dest)?;

        let wanted: HashSet<&str> = names.iter().map(|n| n.as_str()).collect();
        let index = self.index(&wanted)?;

        let mut report = RetrievalReport::default();
        for name in names {
            match index.get(name) {
                Some(source) => {
                    std::fs::copy(source, dest.join(name))?;
                    report.retrieved.push(name.clone());
                }
                None => report.missing.push(name.clone()),
            }
        }

        log::info!(
            "Recalled {} of {} files from {}",
            report.retrieved.len(),
            names.len(),
            self.root.display()
        );
        Ok(report)
    }
}

/// Products served over HTTP as `{base_url}/{name}`
pub struct HttpRetriever {
    base_url: String,
    max_retries: u32,
    client: reqwest::blocking::Client,
}

impl HttpRetriever {
    pub fn new(base_url: &str, timeout_secs: u64, max_retries: u32) -> HunterResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("puddle-hunter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HunterError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: max_retries.max(1),
            client,
        })
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    /// `Ok(None)` when the server does not have the file
    fn fetch(&self, name: &str) -> HunterResult<Option<Vec<u8>>> {
        let url = self.url_for(name);
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            log::debug!("Fetching {} (attempt {} of {})", url, attempt, self.max_retries);

            match self.try_fetch_once(&url) {
                Ok(payload) => return Ok(payload),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        log::warn!("Attempt {} for {} failed, retrying", attempt, url);
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| HunterError::Processing(format!("Download of {} failed", url))))
    }

    fn try_fetch_once(&self, url: &str) -> HunterResult<Option<Vec<u8>>> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| HunterError::Processing(format!("HTTP request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(HunterError::Processing(format!(
                "HTTP {} {}: {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or(""),
                url
            )));
        }

        let content = response
            .bytes()
            .map_err(|e| HunterError::Processing(format!("Failed to read response body: {}", e)))?;
        if content.is_empty() {
            return Err(HunterError::Processing(format!("Empty response from {}", url)));
        }

        decode_payload(&content).map(Some)
    }
}

impl Retriever for HttpRetriever {
    fn retrieve(&self, names: &[String], dest: &Path) -> HunterResult<RetrievalReport> {
        std::fs::create_dir_all(dest)?;

        let mut report = RetrievalReport::default();
        for name in names {
            match self.fetch(name) {
                Ok(Some(bytes)) => {
                    std::fs::write(dest.join(name), bytes)?;
                    report.retrieved.push(name.clone());
                }
                Ok(None) => report.missing.push(name.clone()),
                Err(e) => {
                    log::warn!("Giving up on {}: {}", name, e);
                    report.missing.push(name.clone());
                }
            }
        }

        log::info!(
            "Downloaded {} of {} files from {}",
            report.retrieved.len(),
            names.len(),
            self.base_url
        );
        Ok(report)
    }
}

fn is_gzip_content(content: &[u8]) -> bool {
    content.len() >= 2 && content[0] == 0x1F && content[1] == 0x8B
}

/// Raw bytes of a downloaded product, gunzipped when needed
fn decode_payload(content: &[u8]) -> HunterResult<Vec<u8>> {
    if !is_gzip_content(content) {
        return Ok(content.to_vec());
    }

    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(content);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| HunterError::Processing(format!("Failed to decompress gzip data: {}", e)))?;

    log::debug!("Decompressed {} -> {} bytes", content.len(), decompressed.len());
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_archive_finds_nested_files_and_reports_missing() {
        let archive = tempfile::tempdir().unwrap();
        let nested = archive.path().join("2023").join("01");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(archive.path().join("a_waterk.img"), b"water").unwrap();
        std::fs::write(nested.join("a_cloudmk.img"), b"cloud").unwrap();

        let dest = tempfile::tempdir().unwrap();
        let retriever = ArchiveRetriever::new(archive.path()).unwrap();
        let names = vec![
            "a_waterk.img".to_string(),
            "a_cloudmk.img".to_string(),
            "a_toposhadowmk.img".to_string(),
        ];

        let report = retriever.retrieve(&names, dest.path()).unwrap();
        assert_eq!(report.retrieved, vec!["a_waterk.img", "a_cloudmk.img"]);
        assert_eq!(report.missing, vec!["a_toposhadowmk.img"]);
        assert_eq!(std::fs::read(dest.path().join("a_cloudmk.img")).unwrap(), b"cloud");
    }

    #[test]
    fn test_archive_root_must_exist() {
        assert!(ArchiveRetriever::new("/nonexistent/archive/root").is_err());
    }

    #[test]
    fn test_gzip_payload_is_decompressed() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"raster bytes").unwrap();
        let gz = encoder.finish().unwrap();

        assert!(is_gzip_content(&gz));
        assert_eq!(decode_payload(&gz).unwrap(), b"raster bytes");
        assert_eq!(decode_payload(b"plain").unwrap(), b"plain");
    }

    #[test]
    fn test_http_urls_join_cleanly() {
        let retriever = HttpRetriever::new("https://archive.example.org/products/", 30, 3).unwrap();
        assert_eq!(
            retriever.url_for("a_waterk.img"),
            "https://archive.example.org/products/a_waterk.img"
        );
    }
}
