use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use tempfile::Builder;

use crate::error::MinerError;
use crate::http::{build_client, default_headers, ensure_success, send_with_retries};

pub mod bioportal;
pub mod ols;
pub mod pmc;

pub trait Downloader: Send + Sync {
    fn download(&self, url: &str, dest: &Path) -> Result<u64, MinerError>;
}

#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, MinerError> {
        let client = build_client(default_headers()?, timeout, MinerError::DownloadHttp)?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<u64, MinerError> {
        let response = send_with_retries(|| self.client.get(url), MinerError::DownloadHttp)?;
        let mut response = ensure_success(response, url, |status, message| {
            MinerError::DownloadStatus { status, message }
        })?;

        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|err| MinerError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".ftu-miner-download")
            .tempfile_in(parent)
            .map_err(|err| MinerError::Filesystem(err.to_string()))?;
        let written = response
            .copy_to(temp.as_file_mut())
            .map_err(|err| MinerError::DownloadHttp(format!("{url}: {err}")))?;
        temp.as_file_mut()
            .flush()
            .map_err(|err| MinerError::Filesystem(err.to_string()))?;
        temp.persist(dest)
            .map_err(|err| MinerError::Filesystem(format!("{}: {err}", dest.display())))?;
        Ok(written)
    }
}

impl<T: Downloader> Downloader for &T {
    fn download(&self, url: &str, dest: &Path) -> Result<u64, MinerError> {
        (*self).download(url, dest)
    }
}
