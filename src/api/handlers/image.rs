//! `GET /{app}/api/image?file=<name>`: product images for logged-in staff.
//!
//! The name is reduced to its last path component and a safe character set,
//! then resolved against the canonical images directory. Anything that
//! canonicalizes outside that directory (symlinks included) is a 404.

use axum::{
    extract::{Extension, Query},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, error, warn};

use super::auth::{AuthState, principal::require_auth, utils::ClientIp};

const CACHE_FOR_A_YEAR: &str = "public, max-age=31536000";

const CONTENT_TYPES: [(&str, &str); 6] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
];

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    file: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum ImageError {
    MissingFile,
    NotFound,
    InvalidType,
}

impl IntoResponse for ImageError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingFile => (StatusCode::BAD_REQUEST, "Error: No file specified"),
            Self::NotFound => (StatusCode::NOT_FOUND, "Error: File not found"),
            Self::InvalidType => (StatusCode::FORBIDDEN, "Error: Invalid file type"),
        };
        (status, message).into_response()
    }
}

/// Keep the last path component, replace anything outside `[A-Za-z0-9._-]`
/// and drop leading dots.
fn sanitize_filename(name: &str) -> String {
    let base = name
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

fn content_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(known, _)| *known == extension)
        .map(|(_, content_type)| *content_type)
}

/// Canonical path of `name` inside `dir`, or `NotFound` when it escapes it.
async fn resolve(dir: &Path, name: &str) -> Result<PathBuf, ImageError> {
    if name.is_empty() {
        return Err(ImageError::NotFound);
    }
    let root = tokio::fs::canonicalize(dir).await.map_err(|err| {
        error!("Images directory {} is unavailable: {err}", dir.display());
        ImageError::NotFound
    })?;
    let path = tokio::fs::canonicalize(root.join(name))
        .await
        .map_err(|_| ImageError::NotFound)?;
    if path.starts_with(&root) {
        Ok(path)
    } else {
        Err(ImageError::NotFound)
    }
}

async fn load(dir: &Path, file: &str) -> Result<(&'static str, Vec<u8>), ImageError> {
    let name = sanitize_filename(file);
    let path = resolve(dir, &name).await?;
    let content_type = content_type(&path).ok_or(ImageError::InvalidType)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ImageError::NotFound)?;
    Ok((content_type, bytes))
}

pub async fn image(
    headers: HeaderMap,
    ClientIp(ip): ClientIp,
    Extension(state): Extension<Arc<AuthState>>,
    Query(query): Query<ImageQuery>,
) -> Response {
    let app = state.app();
    let sessions = state.sessions();
    let session = match sessions.start(&headers, ip.as_deref()).await {
        Ok(session) => session,
        Err(err) => {
            error!("Failed to start session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Ok(principal) = require_auth(&session) else {
        warn!(
            ip = ip.as_deref().unwrap_or("unknown"),
            "{app} unauthorized image request"
        );
        return Redirect::to(&app.login_page()).into_response();
    };
    let user_id = principal.user_id;

    if let Err(err) = sessions.save(&session).await {
        error!("Failed to save session: {err}");
    }

    let Some(file) = query.file.filter(|file| !file.is_empty()) else {
        return ImageError::MissingFile.into_response();
    };
    let Some(dir) = state.config().images_dir() else {
        debug!("{app} image requested but no images directory is configured");
        return ImageError::NotFound.into_response();
    };

    match load(dir, &file).await {
        Ok((content_type, bytes)) => (
            [
                (CONTENT_TYPE, HeaderValue::from_static(content_type)),
                (CACHE_CONTROL, HeaderValue::from_static(CACHE_FOR_A_YEAR)),
            ],
            bytes,
        )
            .into_response(),
        Err(err) => {
            if err == ImageError::NotFound {
                warn!(user_id, file = %file, "{app} invalid image path");
            }
            err.into_response()
        }
    }
}
