//! Download collaborator for repository metadata and mod archives
//!
//! Downloads run concurrently on a small worker pool; completions are
//! delivered to a single-threaded callback on the calling thread, so the
//! pipeline's own bookkeeping never needs locking. `file://` URLs are
//! served straight from disk, which is what the test suites and local
//! mirrors use.

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use log::debug;
use reqwest::blocking::Client;
use reqwest::header;
use sha2::{Digest, Sha256};
use url::Url;

use crate::{Error, Result};

/// One download request: mirror URLs tried in order
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub urls: Vec<Url>,
    pub size: Option<u64>,
    pub etag: Option<String>,
}

impl DownloadTarget {
    pub fn new(url: Url) -> Self {
        DownloadTarget {
            urls: vec![url],
            size: None,
            etag: None,
        }
    }

    pub fn primary_url(&self) -> &Url {
        &self.urls[0]
    }
}

/// Completion report for one target
#[derive(Debug)]
pub struct DownloadOutcome {
    /// Index of the target in the submitted slice
    pub index: usize,
    pub error: Option<Error>,
    /// ETag the server reported, if any
    pub etag: Option<String>,
    /// Hex SHA256 of the downloaded bytes
    pub sha256: Option<String>,
    pub data: Vec<u8>,
}

/// Something that can fetch URLs into memory
///
/// The trait is the seam for tests and alternative transports. The
/// completion callback is always invoked on the caller's thread.
pub trait Downloader {
    /// Download all targets, blocking until every one completed, failed or
    /// was cancelled. Per-target failures are reported through the
    /// outcome, not the return value.
    fn download_and_wait(
        &self,
        targets: &[DownloadTarget],
        on_complete: &mut dyn FnMut(DownloadOutcome),
    ) -> Result<()>;

    /// Current ETag of `url` per a HEAD request, if the server offers one
    fn etag(&self, url: &Url) -> Result<Option<String>>;

    /// Ask in-flight downloads to stop; they report as cancelled
    fn cancel_all(&self);
}

/// Blocking HTTP downloader with a fixed worker pool
pub struct HttpDownloader {
    client: Client,
    workers: usize,
    cancelled: Arc<AtomicBool>,
}

impl HttpDownloader {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder().user_agent(user_agent.to_string()).build()?;
        Ok(HttpDownloader {
            client,
            workers: 4,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    fn fetch_target(&self, target: &DownloadTarget) -> (Option<Error>, Option<String>, Vec<u8>) {
        let mut last_error = None;
        for url in &target.urls {
            if self.cancelled.load(Ordering::SeqCst) {
                return (Some(Error::Cancelled), None, Vec::new());
            }
            match self.fetch_url(url) {
                Ok((etag, data)) => return (None, etag, data),
                Err(e) => {
                    debug!("download of {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }
        (
            last_error.or_else(|| {
                Some(Error::Network {
                    url: "<no urls>".to_string(),
                    reason: "target has no URLs".to_string(),
                })
            }),
            None,
            Vec::new(),
        )
    }

    fn fetch_url(&self, url: &Url) -> Result<(Option<String>, Vec<u8>)> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| Error::Network {
                    url: url.to_string(),
                    reason: "invalid file URL".to_string(),
                })?;
            let data = fs::read(path)?;
            return Ok((None, data));
        }

        let response = self.client.get(url.clone()).send().map_err(|e| Error::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(Error::Network {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status().as_u16()),
            });
        }

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response
            .bytes()
            .map_err(|e| Error::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?
            .to_vec();
        Ok((etag, data))
    }
}

impl Downloader for HttpDownloader {
    fn download_and_wait(
        &self,
        targets: &[DownloadTarget],
        on_complete: &mut dyn FnMut(DownloadOutcome),
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        self.cancelled.store(false, Ordering::SeqCst);

        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<DownloadOutcome>();
        let worker_count = self.workers.min(targets.len());

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        if index >= targets.len() {
                            break;
                        }
                        let target = &targets[index];
                        let (error, etag, data) = self.fetch_target(target);
                        let sha256 = if data.is_empty() {
                            None
                        } else {
                            Some(hex::encode(Sha256::digest(&data)))
                        };
                        if tx
                            .send(DownloadOutcome {
                                index,
                                error,
                                etag,
                                sha256,
                                data,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            // Completions funnel through this thread, keeping the caller's
            // bookkeeping single-threaded.
            for outcome in rx {
                on_complete(outcome);
            }
        });

        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn etag(&self, url: &Url) -> Result<Option<String>> {
        if url.scheme() == "file" {
            return Ok(None);
        }
        let response = self.client.head(url.clone()).send().map_err(|e| Error::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(Error::Network {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status().as_u16()),
            });
        }
        Ok(response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }

    fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
