//! Copy path validation.
//!
//! The receiving side of a copy must name a directory: the remote path for
//! an upload, the local path for a download.

use std::path::{Path, PathBuf};

use super::action::SpecError;
use super::step::CopyDirection;

/// Validates and normalizes the two sides of a copy.
pub trait PathResolver: Send + Sync {
    fn resolve(
        &self,
        direction: CopyDirection,
        local: &str,
        remote: &str,
    ) -> Result<(PathBuf, String), SpecError>;
}

/// Resolver that checks local paths against the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPathResolver;

impl LocalPathResolver {
    pub fn new() -> Self {
        Self
    }
}

impl PathResolver for LocalPathResolver {
    fn resolve(
        &self,
        direction: CopyDirection,
        local: &str,
        remote: &str,
    ) -> Result<(PathBuf, String), SpecError> {
        let local = local.trim();
        let remote = remote.trim();

        if local.is_empty() {
            return Err(SpecError::MissingPath("local"));
        }
        if remote.is_empty() {
            return Err(SpecError::MissingPath("remote"));
        }

        match direction {
            CopyDirection::Upload => {
                if !Path::new(local).exists() {
                    return Err(SpecError::InvalidPath(format!(
                        "local path {local} does not exist"
                    )));
                }
                if !remote.ends_with('/') {
                    return Err(SpecError::InvalidPath(format!(
                        "upload target {remote} must be a directory ending with '/'"
                    )));
                }
                Ok((PathBuf::from(local), remote.to_string()))
            }
            CopyDirection::Download => {
                if !Path::new(local).is_dir() {
                    return Err(SpecError::InvalidPath(format!(
                        "download target {local} must be an existing local directory"
                    )));
                }
                if remote.ends_with('/') && remote.len() > 1 {
                    // `/etc/nginx/` and `/etc/nginx` name the same tree.
                    let trimmed = remote.trim_end_matches('/');
                    return Ok((with_trailing_slash(local), trimmed.to_string()));
                }
                Ok((with_trailing_slash(local), remote.to_string()))
            }
        }
    }
}

fn with_trailing_slash(path: &str) -> PathBuf {
    if path.ends_with('/') {
        PathBuf::from(path)
    } else {
        PathBuf::from(format!("{path}/"))
    }
}
