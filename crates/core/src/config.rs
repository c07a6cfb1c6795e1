use std::path::{Path, PathBuf};

use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Bootstrapped identity handed in by the caller (profile/settings layer).
/// The core never invents a user identity; it only persists/reloads one.
#[derive(Debug, Clone)]
pub struct Identity {
    pub local_user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    #[serde(default)]
    pub download_directory: Option<PathBuf>,
    #[serde(default)]
    pub chat_history_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub avatar_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsfwSettings {
    #[serde(default)]
    pub block_outgoing: bool,
    #[serde(default)]
    pub block_incoming: bool,
    #[serde(default = "default_nsfw_threshold")]
    pub threshold: f32,
}

fn default_nsfw_threshold() -> f32 {
    0.8
}

impl Default for NsfwSettings {
    fn default() -> Self {
        Self {
            block_outgoing: false,
            block_incoming: false,
            threshold: default_nsfw_threshold(),
        }
    }
}

/// The key/value settings blob described in spec §6, forward-compatible via
/// `#[serde(default)]` on every field so unknown-at-the-time-of-writing keys
/// degrade gracefully across versions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub user: UserSettings,
    #[serde(default)]
    pub nsfw: NsfwSettings,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            download_directory: None,
            chat_history_directory: None,
        }
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            user_name: None,
            avatar_path: None,
        }
    }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "flykylin", "chat")
}

/// Where incoming images and incoming non-image files land on disk.
#[derive(Debug, Clone)]
pub struct DownloadDirs {
    pub images: PathBuf,
    pub files: PathBuf,
}

/// Resolves download directories per spec §4.7's chain: `preferred` (an
/// explicit `--download-dir` flag or a persisted setting, already merged by
/// the caller) wins for both kinds if given; otherwise the platform's
/// pictures directory (images) or downloads directory (everything else),
/// each under a `FlyKylin` subdirectory. Creates whatever it resolves to.
pub fn resolve_download_dirs(preferred: Option<PathBuf>) -> DownloadDirs {
    let dirs = match preferred {
        Some(dir) => DownloadDirs {
            images: dir.clone(),
            files: dir,
        },
        None => {
            let user_dirs = UserDirs::new();
            let images = user_dirs
                .as_ref()
                .and_then(|d| d.picture_dir())
                .map(|d| d.join("FlyKylin"))
                .unwrap_or_else(|| std::env::temp_dir().join("FlyKylin"));
            let files = user_dirs
                .as_ref()
                .and_then(|d| d.download_dir())
                .map(|d| d.join("FlyKylin"))
                .unwrap_or_else(|| std::env::temp_dir().join("FlyKylin"));
            DownloadDirs { images, files }
        }
    };

    for dir in [&dirs.images, &dirs.files] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(error = %e, path = %dir.display(), "failed to create download directory");
        }
    }

    dirs
}

/// Resolves `<data_dir>/settings.json`, creating the data dir if needed.
pub fn settings_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().join("settings.json"))
}

/// Resolves `<data_dir>/chat_history.db`, matching spec §6's
/// `FlyKylin/chat_history.db` layout.
pub fn chat_history_db_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().join("chat_history.db"))
}

/// Loads settings from disk, falling back to defaults on any I/O or parse
/// error (persistence faults are logged and non-fatal, per spec §7).
pub fn load_settings(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, path = %path.display(), "failed to parse settings, using defaults");
            Settings::default()
        }),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "no settings file, using defaults");
            Settings::default()
        }
    }
}

/// Atomic write-then-rename, matching the store's own persistence discipline.
pub fn save_settings(path: &Path, settings: &Settings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let raw = serde_json::to_string_pretty(settings)?;
    std::fs::write(&tmp, raw)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
