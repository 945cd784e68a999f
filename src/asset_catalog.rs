// src/asset_catalog.rs
//! Diff-and-sync between the local assets folder and a Supabase storage bucket.
//!
//! The manifest (`.asset_manifest.json`) remembers the sha256 of every file as
//! of the last sync, so a local edit is detected without downloading remote
//! content.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult, ServiceError};
use crate::services::{classify_http_failure, classify_transport_error};
use crate::store::{ensure_parent, read_json, write_json};

pub const MANIFEST_FILE: &str = ".asset_manifest.json";

/// Remote side of the sync.
#[async_trait]
pub trait AssetRemote: Send + Sync {
    /// Every object path in the bucket, `/`-separated.
    async fn list(&self) -> Result<Vec<String>, ServiceError>;
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), ServiceError>;
    async fn download(&self, path: &str) -> Result<Vec<u8>, ServiceError>;
}

// ============================================================================
// SUPABASE STORAGE
// ============================================================================

#[derive(Clone)]
pub struct SupabaseStorage {
    client: Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

#[derive(Serialize, Debug)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: u32,
    offset: u32,
}

#[derive(Deserialize, Debug)]
pub struct StorageEntry {
    pub name: String,
    /// Folders come back without an id.
    #[serde(default)]
    pub id: Option<String>,
}

const LIST_PAGE: u32 = 1000;

impl SupabaseStorage {
    pub fn new(base_url: &str, service_key: String, bucket: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket: bucket.into(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            encoded.join("/")
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<StorageEntry>, ServiceError> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let mut entries = Vec::new();
        let mut offset = 0;
        loop {
            let response = self
                .authorized(self.client.post(&url))
                .json(&ListRequest {
                    prefix,
                    limit: LIST_PAGE,
                    offset,
                })
                .send()
                .await
                .map_err(|e| classify_transport_error(&e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_http_failure(status.as_u16(), &body));
            }
            let page: Vec<StorageEntry> = response
                .json()
                .await
                .map_err(|e| ServiceError::Failed(format!("Failed to parse listing: {}", e)))?;
            let count = page.len() as u32;
            entries.extend(page);
            if count < LIST_PAGE {
                return Ok(entries);
            }
            offset += LIST_PAGE;
        }
    }
}

#[async_trait]
impl AssetRemote for SupabaseStorage {
    async fn list(&self) -> Result<Vec<String>, ServiceError> {
        let mut files = Vec::new();
        let mut pending = vec![String::new()];
        while let Some(prefix) = pending.pop() {
            for entry in self.list_prefix(&prefix).await? {
                if entry.name.starts_with('.') {
                    continue;
                }
                let full = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                if entry.id.is_some() {
                    files.push(full);
                } else {
                    pending.push(full);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), ServiceError> {
        let response = self
            .authorized(self.client.post(self.object_url(path)))
            .header("x-upsert", "true")
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status.as_u16(), &body));
        }
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .authorized(self.client.get(self.object_url(path)))
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status.as_u16(), &body));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// LOCAL SIDE
// ============================================================================

/// `path -> sha256 hex` as of the last successful sync.
pub type Manifest = BTreeMap<String, String>;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Hash every file under `root` (hidden files skipped), keyed by
/// `/`-separated relative path.
pub fn scan_local(root: &Path) -> PipelineResult<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    if !root.is_dir() {
        return Ok(files);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(key, sha256_hex(&fs::read(&path)?));
        }
    }
    Ok(files)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub upload: Vec<String>,
    pub download: Vec<String>,
    pub unchanged: Vec<String>,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.upload.is_empty() && self.download.is_empty()
    }
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "upload: {}, download: {}, unchanged: {}",
            self.upload.len(),
            self.download.len(),
            self.unchanged.len()
        )?;
        for path in &self.upload {
            writeln!(f, "  ↑ {}", path)?;
        }
        for path in &self.download {
            writeln!(f, "  ↓ {}", path)?;
        }
        Ok(())
    }
}

/// Diff local hashes, the manifest and the remote listing.
///
/// A local file is uploaded when the remote lacks it or its hash differs
/// from the manifest; remote-only files are downloaded.
pub fn plan_sync(
    local: &BTreeMap<String, String>,
    manifest: &Manifest,
    remote: &BTreeSet<String>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    for (path, hash) in local {
        let changed = manifest.get(path) != Some(hash);
        if !remote.contains(path) || changed {
            plan.upload.push(path.clone());
        } else {
            plan.unchanged.push(path.clone());
        }
    }
    for path in remote {
        if !local.contains_key(path) {
            plan.download.push(path.clone());
        }
    }
    plan
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub plan: SyncPlan,
    pub uploaded: Vec<String>,
    pub downloaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "sync-assets: {} uploaded, {} downloaded, {} unchanged, {} failed",
            self.uploaded.len(),
            self.downloaded.len(),
            self.plan.unchanged.len(),
            self.failed.len()
        )?;
        for (path, error) in &self.failed {
            writeln!(f, "  ✗ {}: {}", path, error)?;
        }
        if !self.failed.is_empty() {
            writeln!(f, "next: {} sync-assets", crate::CLI_NAME)?;
        }
        Ok(())
    }
}

pub struct AssetCatalog {
    root: PathBuf,
    remote: std::sync::Arc<dyn AssetRemote>,
}

impl AssetCatalog {
    pub fn new(root: impl Into<PathBuf>, remote: std::sync::Arc<dyn AssetRemote>) -> Self {
        Self {
            root: root.into(),
            remote,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn load_manifest(&self) -> PipelineResult<Manifest> {
        let path = self.manifest_path();
        if !path.is_file() {
            return Ok(Manifest::new());
        }
        read_json(&path)
    }

    pub async fn plan(&self) -> PipelineResult<SyncPlan> {
        let local = scan_local(&self.root)?;
        let manifest = self.load_manifest()?;
        let remote: BTreeSet<String> = self.remote.list().await?.into_iter().collect();
        Ok(plan_sync(&local, &manifest, &remote))
    }

    /// Execute the plan. Per-file failures are collected; a quota error
    /// stops the run. The manifest is rewritten with what actually synced.
    pub async fn sync(&self) -> PipelineResult<SyncReport> {
        let plan = self.plan().await?;
        let mut manifest = self.load_manifest()?;
        let local = scan_local(&self.root)?;
        let mut report = SyncReport::default();

        for path in &plan.unchanged {
            if let Some(hash) = local.get(path) {
                manifest.insert(path.clone(), hash.clone());
            }
        }

        let mut stop: Option<PipelineError> = None;
        for path in &plan.upload {
            let bytes = fs::read(self.root.join(path))?;
            let hash = sha256_hex(&bytes);
            match self.remote.upload(path, bytes, content_type_for(path)).await {
                Ok(()) => {
                    tracing::info!("⬆️ uploaded {}", path);
                    manifest.insert(path.clone(), hash);
                    report.uploaded.push(path.clone());
                }
                Err(ServiceError::QuotaExceeded(msg)) => {
                    stop = Some(PipelineError::QuotaExhausted(msg));
                    break;
                }
                Err(e) => {
                    tracing::warn!("upload {} failed: {}", path, e);
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        if stop.is_none() {
            for path in &plan.download {
                match self.remote.download(path).await {
                    Ok(bytes) => {
                        let target = self.root.join(path);
                        ensure_parent(&target)?;
                        fs::write(&target, &bytes)?;
                        tracing::info!("⬇️ downloaded {}", path);
                        manifest.insert(path.clone(), sha256_hex(&bytes));
                        report.downloaded.push(path.clone());
                    }
                    Err(ServiceError::QuotaExceeded(msg)) => {
                        stop = Some(PipelineError::QuotaExhausted(msg));
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("download {} failed: {}", path, e);
                        report.failed.push((path.clone(), e.to_string()));
                    }
                }
            }
        }

        manifest.retain(|path, _| local.contains_key(path) || report.downloaded.contains(path));
        write_json(&self.manifest_path(), &manifest)?;
        report.plan = plan;

        match stop {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}
