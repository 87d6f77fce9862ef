// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{anyhow, Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A string key-value store holding the account and certificate records.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, k: &str) -> Result<Option<String>>;
    async fn write(&self, k: &str, v: &str) -> Result<()>;
}

pub struct InMemoryStorage(Arc<RwLock<HashMap<String, String>>>);

impl InMemoryStorage {
    pub fn new() -> Self {
        InMemoryStorage(Arc::new(RwLock::new(HashMap::new())))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn read(&self, k: &str) -> Result<Option<String>> {
        let guard = self.0.read().await;
        Ok(guard.get(k).map(|v| v.to_string()))
    }
    async fn write(&self, k: &str, v: &str) -> Result<()> {
        let mut guard = self.0.write().await;
        guard.insert(k.to_string(), v.to_string());
        Ok(())
    }
}

impl std::default::Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Stores each key as a file inside one directory. The directory is created
/// on first write.
pub struct FileStorage(PathBuf);

impl FileStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        FileStorage(directory.into())
    }
    pub fn directory(&self) -> &Path {
        &self.0
    }
    fn path_of(&self, k: &str) -> Result<PathBuf> {
        if k.is_empty() || k == "." || k == ".." || k.contains(['/', '\\']) {
            return Err(anyhow!("Invalid storage key {:?}", k));
        }
        Ok(self.0.join(k))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, k: &str) -> Result<Option<String>> {
        let path = self.path_of(k)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::new(e).context(format!("error reading file {}", path.display()))),
        }
    }
    // Writes a sibling temporary file and renames it over the target, so a
    // concurrent reader sees either the old or the new value in full.
    async fn write(&self, k: &str, v: &str) -> Result<()> {
        let path = self.path_of(k)?;
        tokio::fs::create_dir_all(&self.0)
            .await
            .map_err(|e| Error::new(e).context(format!("error creating {}", self.0.display())))?;
        let tmp_path = self.0.join(format!(".{}.tmp", k));
        tokio::fs::write(&tmp_path, v)
            .await
            .map_err(|e| {
                Error::new(e).context(format!("error writing file {}", tmp_path.display()))
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Error::new(e).context(format!("error replacing file {}", path.display())))
    }
}
