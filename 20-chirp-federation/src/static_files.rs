use std::io;
use std::path::{Path, PathBuf};

use http::StatusCode;
use tracing::warn;

use crate::error::{ApiError, ROUTE_NOT_FOUND};
use crate::http::Response;

const INDEX_DOCUMENT: &str = "index.html";

/// Serves files from the document root for every `GET` outside the API.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a request path onto the document root. `None` for anything that
    /// would leave it.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let mut resolved = self.root.clone();
        let mut pushed = false;
        for segment in request_path.split('/') {
            match segment {
                "" | "." => {}
                ".." => return None,
                _ if segment.contains('\\') || segment.contains(':') => return None,
                _ => {
                    resolved.push(segment);
                    pushed = true;
                }
            }
        }
        if !pushed {
            resolved.push(INDEX_DOCUMENT);
        }
        Some(resolved)
    }

    pub async fn serve(&self, request_path: &str) -> Result<Response, ApiError> {
        let path = self
            .resolve(request_path)
            .ok_or(ApiError::NotFound(ROUTE_NOT_FOUND))?;
        self.refuse_symlinks(&path).await?;

        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Err(ApiError::NotFound(ROUTE_NOT_FOUND)),
            Err(err) => return Err(file_error(&path, err)),
        }

        let body = tokio::fs::read(&path).await.map_err(|err| file_error(&path, err))?;
        let content_type = mime_guess::from_path(&path).first_or_octet_stream();
        Ok(Response::new(StatusCode::OK, content_type.to_string(), body))
    }

    /// Links below the document root are never followed, so a link cannot
    /// expose data outside it.
    async fn refuse_symlinks(&self, path: &Path) -> Result<(), ApiError> {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return Err(ApiError::NotFound(ROUTE_NOT_FOUND));
        };

        let mut entry = self.root.clone();
        for component in relative.components() {
            entry.push(component);
            let metadata = tokio::fs::symlink_metadata(&entry)
                .await
                .map_err(|err| file_error(&entry, err))?;
            if metadata.file_type().is_symlink() {
                warn!(path = %entry.display(), "refusing to follow symlink");
                return Err(ApiError::NotFound(ROUTE_NOT_FOUND));
            }
        }
        Ok(())
    }
}

fn file_error(path: &Path, err: io::Error) -> ApiError {
    match err.kind() {
        io::ErrorKind::NotFound => ApiError::NotFound(ROUTE_NOT_FOUND),
        _ => {
            warn!(path = %path.display(), error = %err, "failed to read static file");
            ApiError::Internal(err.to_string())
        }
    }
}
