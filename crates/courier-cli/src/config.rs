//! Settings persistence – reads/writes `~/.courier/config.toml`.
//!
//! The file holds the operator [`Settings`] verbatim; fields missing from
//! the file take their defaults.

use courier_types::{ConnectionMode, Settings};
use std::fs;
use std::path::{Path, PathBuf};

/// Return the path to `~/.courier/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".courier").join("config.toml")
}

/// Load settings from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Settings>, String> {
    load_from(&config_path())
}

/// Load settings from a specific path, then apply environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Settings>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut settings: Settings =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut settings);
    Ok(Some(settings))
}

/// Apply `COURIER_*` environment variable overrides to `settings`.
///
/// | Variable | Settings field |
/// |---|---|
/// | `COURIER_BRIDGE_ADDRESS` | `bridge_address` |
/// | `COURIER_FALLBACK_ADDRESS` | `fallback_address` |
/// | `COURIER_CONNECTION_MODE` | `connection_mode` (`auto`, `manual`, `fallback`) |
/// | `COURIER_THROTTLE_MS` | `throttle_rate_ms` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(v) = std::env::var("COURIER_BRIDGE_ADDRESS")
        && !v.trim().is_empty()
    {
        settings.bridge_address = v;
    }
    if let Ok(v) = std::env::var("COURIER_FALLBACK_ADDRESS")
        && !v.trim().is_empty()
    {
        settings.fallback_address = Some(v);
    }
    if let Ok(v) = std::env::var("COURIER_CONNECTION_MODE")
        && let Ok(mode) = v.parse::<ConnectionMode>()
    {
        settings.connection_mode = mode;
    }
    if let Ok(v) = std::env::var("COURIER_THROTTLE_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        settings.throttle_rate_ms = ms;
    }
}

/// Save settings to disk, creating `~/.courier/` if necessary.
pub fn save(settings: &Settings) -> Result<(), String> {
    save_to(settings, &config_path())
}

/// Save settings to a specific path.
pub(crate) fn save_to(settings: &Settings, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::Point;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Settings::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_settings() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let settings = Settings {
            robot_name: "Courier-7".into(),
            max_linear_velocity: 1.2,
            home: Some(Point::new(1.0, 2.0, 3.0)),
            ..Settings::default()
        };
        save_to(&settings, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.robot_name, "Courier-7");
        assert_eq!(loaded.max_linear_velocity, 1.2);
        assert_eq!(loaded.home, Some(Point::new(1.0, 2.0, 3.0)));
        assert_eq!(loaded.connection, settings.connection);
    }

    #[test]
    fn partial_file_takes_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "robot_name = \"Scout\"\ncamera_enabled = false\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.robot_name, "Scout");
        assert!(!loaded.camera_enabled);
        assert_eq!(loaded.update_frequency, Settings::default().update_frequency);
        assert_eq!(loaded.connection.queue_depth, 64);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_linear_velocity = \"fast\"").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_courier_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".courier"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_bridge_address() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("COURIER_BRIDGE_ADDRESS", "192.168.1.20") };
        let mut settings = Settings::default();
        apply_env_overrides(&mut settings);
        assert_eq!(settings.bridge_address, "192.168.1.20");
        unsafe { std::env::remove_var("COURIER_BRIDGE_ADDRESS") };
    }

    #[test]
    fn apply_env_overrides_changes_mode_and_fallback() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe {
            std::env::set_var("COURIER_CONNECTION_MODE", "fallback");
            std::env::set_var("COURIER_FALLBACK_ADDRESS", "10.0.0.2");
        };
        let mut settings = Settings::default();
        apply_env_overrides(&mut settings);
        assert_eq!(settings.connection_mode, ConnectionMode::Fallback);
        assert_eq!(settings.fallback_address.as_deref(), Some("10.0.0.2"));
        unsafe {
            std::env::remove_var("COURIER_CONNECTION_MODE");
            std::env::remove_var("COURIER_FALLBACK_ADDRESS");
        };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_throttle() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("COURIER_THROTTLE_MS", "soon") };
        let mut settings = Settings::default();
        let original = settings.throttle_rate_ms;
        apply_env_overrides(&mut settings);
        assert_eq!(settings.throttle_rate_ms, original);
        unsafe { std::env::remove_var("COURIER_THROTTLE_MS") };
    }
}
