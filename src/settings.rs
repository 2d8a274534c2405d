use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// G-buffer resolution.
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub import: ImportSettings,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            failure_policy: FailurePolicy::default(),
            import: ImportSettings::default(),
            present_mode: PresentModeSetting::default(),
        }
    }
}

impl Settings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    /// Reads settings, falling back to defaults when the file is missing or
    /// malformed.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::try_load_from_path(path) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(SettingsError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                info!("Settings file {:?} not found. Using default settings.", path);
                Settings::default()
            }
            Err(err) => {
                warn!("{}. Falling back to default settings.", err);
                Settings::default()
            }
        }
    }

    pub fn try_load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings =
            serde_json::from_str::<Settings>(&contents).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(settings.validate())
    }

    pub fn validate(mut self) -> Self {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }
        self
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = self.present_mode.to_wgpu();
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// What happens when a G-buffer or model cannot be built completely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log a warning and return a best-effort result.
    #[default]
    Degrade,
    /// Return an error and release partial resources.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSettings {
    /// Bake the transform of the node referencing each mesh into its vertices.
    #[serde(default = "ImportSettings::default_apply_node_transforms")]
    pub apply_node_transforms: bool,
    /// Replace `v` with `1 - v` in every UV channel.
    #[serde(default)]
    pub flip_uvs: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            apply_node_transforms: Self::default_apply_node_transforms(),
            flip_uvs: false,
        }
    }
}

impl ImportSettings {
    const fn default_apply_node_transforms() -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    fn to_wgpu(self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_replaces_zero_resolution() {
        let settings = Settings {
            resolution: Resolution {
                width: 0,
                height: 600,
            },
            ..Settings::default()
        };
        assert_eq!(settings.validate().resolution, Resolution::default());
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = Settings {
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            failure_policy: FailurePolicy::Strict,
            import: ImportSettings {
                apply_node_transforms: false,
                flip_uvs: true,
            },
            present_mode: PresentModeSetting::Mailbox,
        };
        assert_eq!(valid.clone().validate(), valid);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "failure_policy": "strict", "import": { "flip_uvs": true } }"#)
                .unwrap();
        assert_eq!(settings.failure_policy, FailurePolicy::Strict);
        assert!(settings.import.flip_uvs);
        assert!(settings.import.apply_node_transforms);
        assert_eq!(settings.resolution, Resolution::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from_path(dir.path().join("settings.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn malformed_file_is_an_error_when_strict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            Settings::try_load_from_path(&path),
            Err(SettingsError::Parse { .. })
        ));
        assert_eq!(Settings::load_from_path(&path), Settings::default());
    }

    #[test]
    fn loaded_file_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "resolution": { "width": 0, "height": 0 } }"#).unwrap();
        let settings = Settings::try_load_from_path(&path).unwrap();
        assert_eq!(settings.resolution, Resolution::default());
    }

    #[test]
    fn present_mode_falls_back_to_fifo_when_desired_missing() {
        let settings = Settings {
            present_mode: PresentModeSetting::Mailbox,
            ..Settings::default()
        };
        let available = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate];
        assert_eq!(settings.present_mode(&available), wgpu::PresentMode::Fifo);
    }

    #[test]
    fn present_mode_uses_first_available_when_fifo_missing() {
        let settings = Settings {
            present_mode: PresentModeSetting::Mailbox,
            ..Settings::default()
        };
        let available = [wgpu::PresentMode::Immediate];
        assert_eq!(
            settings.present_mode(&available),
            wgpu::PresentMode::Immediate
        );
    }
}
