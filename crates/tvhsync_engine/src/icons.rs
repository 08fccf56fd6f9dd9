//! Content-addressed icon cache.
//!
//! Icons are fetched either over HTTP or over the HTSP file-transfer
//! sub-channel, downsampled by a power of two towards the target size and
//! stored as `<sha256(url)>.png`.

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::pool::PoolHandle;
use crate::signal::Countdown;
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tvhsync_protocol::{requests, MIN_FILE_TRANSFER_VERSION};
use tvhsync_store::Store;

/// Bytes requested per `fileRead`.
const READ_CHUNK: i64 = 64 * 1024;

/// Downloads the raw bytes of an icon.
pub trait IconFetcher: Send + Sync {
    /// Fetches the resource at `source`.
    fn fetch(&self, source: &str) -> EngineResult<Vec<u8>>;
}

/// Fetches absolute `http://` and `https://` URLs.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent }
    }
}

impl IconFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> EngineResult<Vec<u8>> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| EngineError::icon(format!("request failed: {e}")))?;
        response
            .body_mut()
            .read_to_vec()
            .map_err(|e| EngineError::icon(format!("read failed: {e}")))
    }
}

/// Fetches server-relative paths with `fileOpen`/`fileRead`/`fileClose`.
pub struct HtspFileFetcher {
    dispatcher: Arc<Dispatcher>,
    timeout: Duration,
}

impl HtspFileFetcher {
    /// Creates a fetcher that uses the connection behind `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            timeout,
        }
    }

    fn read_all(&self, id: u32, size: Option<i64>) -> EngineResult<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let reply = self
                .dispatcher
                .request_blocking(requests::file_read(id, READ_CHUNK), self.timeout)?;
            if let Some(error) = reply.str("error") {
                return Err(EngineError::ServerRejected(error.to_string()));
            }
            let chunk = reply.bytes("data").unwrap_or_default();
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
            if size.is_some_and(|size| data.len() as i64 >= size) {
                break;
            }
        }
        Ok(data)
    }
}

impl IconFetcher for HtspFileFetcher {
    fn fetch(&self, path: &str) -> EngineResult<Vec<u8>> {
        let opened = self
            .dispatcher
            .request_blocking(requests::file_open(path), self.timeout)?;
        if let Some(error) = opened.str("error") {
            return Err(EngineError::ServerRejected(error.to_string()));
        }
        let id = opened.require_u32("id")?;
        let data = self.read_all(id, opened.i64("size"));
        if let Err(err) = self
            .dispatcher
            .request_blocking(requests::file_close(id), self.timeout)
        {
            debug!(path, error = %err, "fileClose failed");
        }
        data
    }
}

/// Cache key of an icon URL: lowercase hex SHA-256.
pub fn cache_key(url: &str) -> String {
    Sha256::digest(url.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Largest power of two not above `max(width / target, height / target)`,
/// at least 1.
pub fn sample_factor(width: u32, height: u32, target: u32) -> u32 {
    let target = target.max(1);
    let ratio = (width / target).max(height / target);
    if ratio <= 1 {
        1
    } else {
        1 << (u32::BITS - 1 - ratio.leading_zeros())
    }
}

/// Decodes an image, downsamples it by [`sample_factor`] and encodes PNG.
pub fn transcode(bytes: &[u8], target: u32) -> EngineResult<Vec<u8>> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    let factor = sample_factor(width, height, target);

    let mut image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    if factor > 1 {
        image = image.resize_exact(
            (width / factor).max(1),
            (height / factor).max(1),
            FilterType::Triangle,
        );
    }

    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Downloads, transcodes and stores icons.
pub struct IconCache {
    dir: PathBuf,
    target: u32,
    batch_timeout: Duration,
    store: Arc<dyn Store>,
    pool: PoolHandle,
    http: Arc<dyn IconFetcher>,
    htsp: Arc<dyn IconFetcher>,
}

impl IconCache {
    /// Creates a cache using the given fetchers.
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn Store>,
        pool: PoolHandle,
        http: Arc<dyn IconFetcher>,
        htsp: Arc<dyn IconFetcher>,
    ) -> Self {
        Self {
            dir: config.icon_dir.clone(),
            target: config.icon_target_size(),
            batch_timeout: config.batch_timeout,
            store,
            pool,
            http,
            htsp,
        }
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File an icon URL is cached in.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.png", cache_key(url)))
    }

    /// Returns true if the icon is already cached.
    pub fn contains(&self, url: &str) -> bool {
        self.path_for(url).exists()
    }

    /// Fetches and stores one icon. Returns false if nothing was fetched:
    /// the URL is empty, already cached, or not reachable with this server.
    pub fn load(&self, url: &str) -> EngineResult<bool> {
        if url.is_empty() {
            return Ok(false);
        }
        let path = self.path_for(url);
        if path.exists() {
            debug!(url, "icon already cached");
            return Ok(false);
        }

        let fetcher = if url.starts_with("http://") || url.starts_with("https://") {
            &self.http
        } else if self.store.status().load()?.htsp_version >= MIN_FILE_TRANSFER_VERSION {
            &self.htsp
        } else {
            debug!(url, "server too old for file transfer, icon skipped");
            return Ok(false);
        };

        let bytes = fetcher.fetch(url)?;
        let png = transcode(&bytes, self.target)?;
        self.write(&path, &png)?;
        debug!(url, path = %path.display(), "icon cached");
        Ok(true)
    }

    fn write(&self, path: &Path, png: &[u8]) -> EngineResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(png)?;
        file.persist(path).map_err(|e| EngineError::Io(e.error))?;
        Ok(())
    }

    /// Fetches every URL on the worker pool and waits for the batch.
    ///
    /// Individual failures are logged and skipped. Returns false if the
    /// batch did not finish within the batch timeout.
    pub fn warm_all(self: &Arc<Self>, urls: impl IntoIterator<Item = String>) -> bool {
        let urls: BTreeSet<String> = urls.into_iter().filter(|u| !u.is_empty()).collect();
        let countdown = Countdown::new(urls.len());
        for url in urls {
            let cache = Arc::clone(self);
            let countdown = countdown.clone();
            self.pool.execute(move || {
                if let Err(err) = cache.load(&url) {
                    warn!(url = %url, error = %err, "could not load icon");
                }
                countdown.arrive();
            });
        }
        let finished = countdown.wait(self.batch_timeout);
        if !finished {
            warn!("icon batch did not finish in time");
        }
        finished
    }

    /// Deletes the cached file of an icon. Returns whether a file was removed.
    pub fn remove(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        let path = self.path_for(url);
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "could not delete icon");
                false
            }
        }
    }
}
