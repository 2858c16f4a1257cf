// src/repository/mod.rs

//! Remote package repository access
//!
//! This module provides:
//! - Streaming downloads with progress and retry on transient failures
//! - Listing the archives published in a remote repository
//!
//! Transport errors are translated into `Error::NetworkError` here; no
//! reqwest types escape this module.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packages::{REMOTE_SUFFIXES, has_suffix};
use crate::progress::{Progress, ProgressObserver, Stage};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for downloads that fail to connect or time out
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Bytes read from the response per iteration
const DOWNLOAD_CHUNK_SIZE: usize = 4096;

/// A package archive published in a remote repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePackage {
    /// Archive filename, e.g. `myapp-1.0.tar.xz`
    pub name: String,
    pub download_url: String,
}

/// One entry of a directory listing (GitHub contents API shape)
#[derive(Debug, Deserialize)]
struct ListingEntry {
    name: String,
    download_url: Option<String>,
}

/// HTTP client wrapper with retry support
pub struct Fetcher {
    client: Client,
    max_retries: u32,
}

impl Fetcher {
    /// Create a new fetcher with default timeout and retries
    pub fn new() -> Result<Self> {
        Self::with_settings(HTTP_TIMEOUT, MAX_RETRIES)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_settings(config.http_timeout(), config.download_retries)
    }

    pub fn with_settings(timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dpms/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::CoreError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: max_retries.max(1),
        })
    }

    /// GET a URL, retrying connection failures and timeouts
    fn get(&self, url: &str) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::NetworkError(format!(
                            "HTTP Error: {} from {}",
                            response.status(),
                            url
                        )));
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let retryable = e.is_connect() || e.is_timeout();
                    if !retryable || attempt >= self.max_retries {
                        return Err(network_error(url, &e));
                    }
                    warn!("Request attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    /// Download a URL to `dest_path`, streaming in fixed-size chunks
    ///
    /// The body is written to `<dest_path>.part` and renamed into place once
    /// complete. A failed download leaves the partial file for inspection.
    /// The observer is finished whether or not the download succeeds.
    /// Returns the number of bytes written.
    pub fn download(
        &self,
        url: &str,
        dest_path: &Path,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<u64> {
        info!("Downloading {} to {}", url, dest_path.display());

        let progress = Progress::new(Stage::Download, observer);
        let result = self.download_to(url, dest_path, progress);
        progress.finish();
        let received = result?;

        info!("Successfully downloaded {} bytes to {}", received, dest_path.display());
        Ok(received)
    }

    fn download_to(&self, url: &str, dest_path: &Path, progress: Progress<'_>) -> Result<u64> {
        if let Some(parent) = dest_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::CoreError(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let mut response = self.get(url)?;
        let total = response.content_length();

        let temp_path = partial_path(dest_path);
        let mut file = File::create(&temp_path).map_err(|e| {
            Error::CoreError(format!("Failed to create file {}: {}", temp_path.display(), e))
        })?;

        let mut buffer = [0u8; DOWNLOAD_CHUNK_SIZE];
        let mut received = 0u64;
        progress.report(0, total);

        loop {
            let n = response.read(&mut buffer).map_err(|e| {
                Error::NetworkError(format!("Failed to read response from {}: {}", url, e))
            })?;
            if n == 0 {
                break;
            }

            file.write_all(&buffer[..n]).map_err(|e| {
                Error::CoreError(format!("Failed to write downloaded data: {}", e))
            })?;
            received += n as u64;
            progress.report(received, total);
        }

        file.flush()
            .map_err(|e| Error::CoreError(format!("Failed to write downloaded data: {}", e)))?;
        drop(file);

        if let Some(expected) = total.filter(|&expected| expected != received) {
            return Err(Error::NetworkError(format!(
                "Incomplete download from {}: received {} of {} bytes",
                url, received, expected
            )));
        }

        // Atomic rename from temp to final destination
        fs::rename(&temp_path, dest_path).map_err(|e| {
            Error::CoreError(format!(
                "Failed to move {} to {}: {}",
                temp_path.display(),
                dest_path.display(),
                e
            ))
        })?;

        Ok(received)
    }

    /// List the archives published at a repository listing endpoint
    ///
    /// Only `.tar.xz` and `.tar.gz` entries with a download URL are returned.
    pub fn list_remote_packages(&self, api_url: &str) -> Result<Vec<RemotePackage>> {
        info!("Fetching package list from {}", api_url);

        let response = self.get(api_url)?;
        let entries: Vec<ListingEntry> = response.json().map_err(|e| {
            Error::NetworkError(format!("Failed to parse package listing from {}: {}", api_url, e))
        })?;

        let packages: Vec<RemotePackage> = entries
            .into_iter()
            .filter(|entry| has_suffix(&entry.name, REMOTE_SUFFIXES))
            .filter_map(|entry| match entry.download_url {
                Some(download_url) => Some(RemotePackage {
                    name: entry.name,
                    download_url,
                }),
                None => {
                    debug!("Listing entry {} has no download URL", entry.name);
                    None
                }
            })
            .collect();

        info!("Found {} remote packages", packages.len());
        Ok(packages)
    }
}

/// `foo.tar.gz` -> `foo.tar.gz.part`
fn partial_path(dest_path: &Path) -> PathBuf {
    let mut name = dest_path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Translate a transport failure into a human-readable network error
fn network_error(url: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::NetworkError(format!("Timeout Error: the request to {} timed out", url))
    } else if e.is_connect() {
        Error::NetworkError(format!(
            "Connection Error: a connection to {} could not be established. Check your internet connection or URL",
            url
        ))
    } else if let Some(status) = e.status() {
        Error::NetworkError(format!("HTTP Error: {} from {}", status, url))
    } else {
        Error::NetworkError(format!("An unexpected network error occurred for {}: {}", url, e))
    }
}

/// Last path segment of a URL, without query or fragment
pub fn url_filename(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next()?;
    let after_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let (_, path) = after_scheme.split_once('/')?;
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Minimal HTTP/1.1 server serving canned responses by path
    pub struct TestServer {
        pub base_url: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl TestServer {
        pub fn start(routes: Vec<(&str, u16, Vec<u8>)>) -> Self {
            let routes: Vec<(String, u16, Vec<u8>)> = routes
                .into_iter()
                .map(|(path, status, body)| (path.to_string(), status, body))
                .collect();
            Self::start_with(move |_| routes)
        }

        /// Start a server whose routes may refer to its own base URL
        pub fn start_with<F>(build: F) -> Self
        where
            F: FnOnce(&str) -> Vec<(String, u16, Vec<u8>)>,
        {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());
            let routes: HashMap<String, (u16, Vec<u8>)> = build(&base_url)
                .into_iter()
                .map(|(path, status, body)| (path, (status, body)))
                .collect();
            let requests = Arc::new(Mutex::new(Vec::new()));

            let seen = Arc::clone(&requests);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { continue };
                    handle(stream, &routes, &seen);
                }
            });

            Self { base_url, requests }
        }

        pub fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }

        /// Paths requested so far, in order
        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn handle(
        mut stream: TcpStream,
        routes: &HashMap<String, (u16, Vec<u8>)>,
        seen: &Mutex<Vec<String>>,
    ) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let text = String::from_utf8_lossy(&request);
        let path = text.split_whitespace().nth(1).unwrap_or("/").to_string();
        seen.lock().unwrap().push(path.clone());

        let (status, body) = routes
            .get(&path)
            .cloned()
            .unwrap_or((404, b"not found".to_vec()));
        let reason = if status == 200 { "OK" } else { "Error" };
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            reason,
            body.len()
        );
        let _ = stream.write_all(head.as_bytes());
        let _ = stream.write_all(&body);
        let _ = stream.flush();
    }

    /// A URL on localhost where nothing is listening
    pub fn unreachable_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }
}
