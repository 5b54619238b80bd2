//! Roster of known identities, enrolled once at startup.
//!
//! Layout on disk:
//!   known_faces/<id>.{jpg,jpeg,png}   reference photo, one face
//!   avatars/<id>_avatar.{jpg,jpeg,png} optional badge avatar

use crate::matcher::FaceMatcher;
use crate::types::Identity;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("duplicate identity id: {0}")]
    DuplicateId(String),
    #[error("failed to read roster directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Immutable, id-unique list of enrolled identities.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    identities: Vec<Identity>,
}

impl Roster {
    pub fn new(identities: Vec<Identity>) -> Result<Self, RosterError> {
        let mut seen = HashSet::new();
        for identity in &identities {
            if !seen.insert(identity.id.as_str()) {
                return Err(RosterError::DuplicateId(identity.id.clone()));
            }
        }
        Ok(Self { identities })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, id: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Enroll every reference photo in `faces_dir`.
    ///
    /// The file stem is the identity id. Photos without a detectable face,
    /// unreadable photos, and repeated ids are skipped with a warning. A
    /// missing directory yields an empty roster.
    pub fn load<M: FaceMatcher + ?Sized>(
        matcher: &mut M,
        faces_dir: &Path,
        avatars_dir: &Path,
    ) -> Result<Self, RosterError> {
        if !faces_dir.is_dir() {
            tracing::warn!(dir = %faces_dir.display(), "roster directory not found; no identities enrolled");
            return Ok(Self::empty());
        }

        let files = list_images(faces_dir)?;
        tracing::info!(count = files.len(), dir = %faces_dir.display(), "enrolling roster");

        let mut identities: Vec<Identity> = Vec::with_capacity(files.len());
        for path in files {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if identities.iter().any(|i| i.id == id) {
                tracing::warn!(id = %id, path = %path.display(), "duplicate roster id; skipping");
                continue;
            }

            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable roster photo");
                    continue;
                }
            };

            let reference = match matcher.samples(&image) {
                Ok(samples) => match samples.into_iter().next() {
                    Some(sample) => sample.embedding,
                    None => {
                        tracing::warn!(path = %path.display(), "no face in roster photo");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to embed roster photo");
                    continue;
                }
            };

            let avatar = find_avatar(avatars_dir, &id);
            tracing::info!(id = %id, avatar = avatar.is_some(), "enrolled");
            identities.push(Identity {
                id,
                reference,
                reference_image: path,
                avatar,
            });
        }

        tracing::info!(total = identities.len(), "roster loaded");
        Self::new(identities)
    }
}

/// Look for `<id>_avatar.<ext>` in `avatars_dir`.
pub fn find_avatar(avatars_dir: &Path, id: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
        .iter()
        .flat_map(|ext| [ext.to_string(), ext.to_uppercase()])
        .map(|ext| avatars_dir.join(format!("{id}_avatar.{ext}")))
        .find(|p| p.is_file())
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, RosterError> {
    let io_err = |source| RosterError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
