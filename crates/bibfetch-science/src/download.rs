use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Result, ScienceError};
use crate::http::{ClientSettings, RateLimitedClient};
use crate::sources::DownloadBackend;

/// Downloads files over HTTP into a destination directory.
pub struct HttpFileFetcher {
    client: RateLimitedClient,
}

impl HttpFileFetcher {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        Ok(Self {
            client: RateLimitedClient::new(settings)?,
        })
    }
}

#[async_trait]
impl DownloadBackend for HttpFileFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let filename = filename_from_url(url)
            .ok_or_else(|| ScienceError::Download(format!("no file name in URL {url}")))?;

        debug!(%url, "downloading");
        let bytes = self.client.get_bytes(url).await?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| ScienceError::Download(format!("{}: {e}", dest_dir.display())))?;
        let path = dest_dir.join(filename);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ScienceError::Download(format!("{}: {e}", path.display())))?;

        info!(path = %path.display(), bytes = bytes.len(), "saved file");
        Ok(path)
    }
}

/// Last path segment of `url`, without query string or fragment.
///
/// `None` when the URL ends in `/` or the segment is not a usable file name.
pub fn filename_from_url(url: &str) -> Option<String> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    let path = path
        .find("://")
        .map(|i| &path[i + 3..])
        .map(|rest| rest.find('/').map_or("", |i| &rest[i..]))
        .unwrap_or(path);
    let name = path.rsplit('/').next()?.trim();
    match name {
        "" | "." | ".." => None,
        _ => Some(name.to_string()),
    }
}
