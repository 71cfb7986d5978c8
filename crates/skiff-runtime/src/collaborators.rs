//! External collaborators handed to handlers through the context.
//!
//! The runtime only consumes these at their boundary; git cloning and blob
//! storage live outside this workspace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Repository coordinates for a clone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryId {
    pub owner: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    /// API base for non-default hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl RepositoryId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// `owner/repo`.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Clone behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneOptions {
    /// Shallow clone depth; `None` for a full clone.
    pub depth: Option<u32>,
    /// Check out the sha detached instead of the branch.
    pub detach: bool,
    /// Credential used for the clone.
    pub credential: Option<String>,
}

/// A checked-out repository on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: RepositoryId,
    pub path: PathBuf,
}

/// Clones repositories for handlers.
#[async_trait]
pub trait ProjectLoader: Send + Sync {
    async fn clone_project(&self, id: &RepositoryId, options: &CloneOptions) -> Result<Project>;
}

/// Blob storage scoped to the skill.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Upload `source` under `key`.
    async fn store(&self, key: &str, source: &Path) -> Result<()>;

    /// Download `key`, to `target` when given, else to a provider-chosen
    /// path. Returns the local path.
    async fn retrieve(&self, key: &str, target: Option<&Path>) -> Result<PathBuf>;

    async fn delete(&self, key: &str) -> Result<()>;
}
