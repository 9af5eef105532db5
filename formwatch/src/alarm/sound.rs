//! Choice of the alarm sound.
//!
//! The user may import one custom sound. It is copied into storage the
//! daemon owns so that deleting or moving the original file cannot break
//! the alarm. Whenever the custom file is unusable the bundled default
//! plays instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Result, StorageError};
use crate::store::{CUSTOM_SOUND_KEY, KeyValueStore};
use crate::tracing::prelude::*;

/// Persisted reference to an imported alarm sound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomAlarmSource {
    pub present: bool,
    pub file_path: PathBuf,
    pub display_name: String,
}

/// What the playback sink should play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundRef {
    /// The sound shipped with the daemon.
    Bundled,
    /// An imported sound file that existed when resolved.
    Custom(PathBuf),
}

pub struct AlarmSoundResolver {
    store: Arc<dyn KeyValueStore>,
    sounds_dir: PathBuf,
}

impl AlarmSoundResolver {
    /// `sounds_dir` is where imported sounds are copied to.
    pub fn new(store: Arc<dyn KeyValueStore>, sounds_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            sounds_dir: sounds_dir.into(),
        }
    }

    /// The persisted custom source, if any.
    ///
    /// Unreadable or corrupt records are logged and reported as absent.
    pub fn custom_source(&self) -> Option<CustomAlarmSource> {
        let raw = match self.store.get(CUSTOM_SOUND_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read custom alarm sound reference");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(error = %e, "Ignoring corrupt custom alarm sound reference");
                None
            }
        }
    }

    /// Sound to play right now.
    ///
    /// Returns the custom sound only if it is marked present and its file
    /// exists at call time; the bundled default otherwise.
    pub fn resolve_playback_source(&self) -> SoundRef {
        match self.custom_source() {
            Some(source) if source.present => {
                if source.file_path.is_file() {
                    SoundRef::Custom(source.file_path)
                } else {
                    warn!(
                        path = %source.file_path.display(),
                        "Custom alarm sound missing, using bundled default"
                    );
                    SoundRef::Bundled
                }
            }
            _ => SoundRef::Bundled,
        }
    }

    /// Where imported sounds are copied to.
    pub fn sounds_dir(&self) -> &Path {
        &self.sounds_dir
    }

    /// Import `path` as the custom alarm sound.
    ///
    /// Shorthand for [`stage_sound`] followed by [`Self::commit_custom_source`].
    /// Callers sharing the resolver should stage without holding it.
    pub fn set_custom_source(&mut self, path: &Path, name: &str) -> Result<CustomAlarmSource> {
        let staged = stage_sound(&self.sounds_dir, path)?;
        self.commit_custom_source(staged, name)
    }

    /// Make a staged copy the custom alarm sound.
    ///
    /// The reference replaces the previous one in a single write and the
    /// previous copy is deleted afterwards. If persisting fails, the staged
    /// copy is deleted and the previous source stays active.
    pub fn commit_custom_source(&mut self, staged: StagedSound, name: &str) -> Result<CustomAlarmSource> {
        let display_name = if name.trim().is_empty() {
            staged.original_name
        } else {
            name.trim().to_string()
        };

        let source = CustomAlarmSource {
            present: true,
            file_path: staged.file_path,
            display_name,
        };

        let previous = self.custom_source();
        let persisted = serde_json::to_string(&source)
            .map_err(|e| StorageError::json("serializing custom alarm sound reference", e))
            .and_then(|json| self.store.set(CUSTOM_SOUND_KEY, &json));
        if let Err(e) = persisted {
            remove_sound_file(&source.file_path);
            return Err(e.into());
        }

        if let Some(previous) = previous {
            if previous.file_path != source.file_path {
                remove_sound_file(&previous.file_path);
            }
        }

        info!(
            name = %source.display_name,
            path = %source.file_path.display(),
            "Custom alarm sound imported"
        );
        Ok(source)
    }

    /// Forget the custom sound and go back to the bundled default.
    ///
    /// The reference is cleared first; failing to delete the copy
    /// afterwards only leaves an orphaned file.
    pub fn clear_custom_source(&mut self) -> Result<()> {
        let previous = self.custom_source();
        self.store.remove(CUSTOM_SOUND_KEY)?;

        if let Some(previous) = previous {
            remove_sound_file(&previous.file_path);
            info!(name = %previous.display_name, "Custom alarm sound cleared");
        }
        Ok(())
    }
}

/// A sound copied into the sounds directory but not yet referenced.
#[derive(Debug)]
pub struct StagedSound {
    file_path: PathBuf,
    original_name: String,
}

impl StagedSound {
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

/// Copy `path` into `sounds_dir` under a fresh name.
///
/// Reads no persisted state, so a slow copy never holds up the resolver.
pub fn stage_sound(sounds_dir: &Path, path: &Path) -> Result<StagedSound> {
    std::fs::create_dir_all(sounds_dir).map_err(|e| {
        StorageError::io(
            format!("creating sounds directory {}", sounds_dir.display()),
            e,
        )
    })?;

    let destination = sounds_dir.join(durable_file_name(path));
    if let Err(e) = std::fs::copy(path, &destination) {
        // A failed copy may leave a partial file behind.
        let _ = std::fs::remove_file(&destination);
        return Err(StorageError::io(
            format!(
                "copying {} to {}",
                path.display(),
                destination.display()
            ),
            e,
        )
        .into());
    }

    let original_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Custom sound".to_string());
    Ok(StagedSound {
        file_path: destination,
        original_name,
    })
}

fn durable_file_name(original: &Path) -> String {
    let stamp = OffsetDateTime::now_utc().unix_timestamp_nanos();
    match original.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("custom-{stamp}.{ext}"),
        None => format!("custom-{stamp}"),
    }
}

fn remove_sound_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed alarm sound file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove alarm sound file"),
    }
}
