// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use stereo_camera::backends::camera::types::Size;
use stereo_camera::config::Stabilization;
use stereo_camera::{AppError, BitratePreset, Settings};

#[test]
fn test_settings_default() {
    // Test that default settings can be created
    let settings = Settings::default();

    // Check sensible defaults
    assert!(!settings.raw_mode, "Processed stills should be the default");
    assert!(!settings.zoom_2x_enabled, "2x zoom should be opt-in");
    assert!(settings.outputs.save_composite);
    assert!(!settings.ultra_priming.enabled);
    assert_eq!(settings.record.stabilization, Stabilization::Off);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(&dir.path().join("missing.json")).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();

    let result = Settings::load(&path);
    assert!(matches!(result, Err(AppError::Config(_))), "{:?}", result);
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("settings.json");

    let mut settings = Settings::default();
    settings.raw_mode = true;
    settings.record.size = Size::new(1280, 720);
    settings.record.bitrate_preset = BitratePreset::High;
    settings.record.stabilization = Stabilization::Both;
    settings.logging.capture_log = true;
    settings.save(&path).unwrap();

    assert_eq!(Settings::load(&path).unwrap(), settings);
}

#[test]
fn test_partial_file_keeps_defaults() {
    // Older files without newer fields still load
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{ "zoom_2x_enabled": true }"#).unwrap();

    let settings = Settings::load(&path).unwrap();
    assert!(settings.zoom_2x_enabled);
    assert_eq!(settings.record, Settings::default().record);
}

#[test]
fn test_processed_needs_result() {
    let mut settings = Settings::default();
    assert!(!settings.processed_needs_result());

    settings.logging.sync_notification = true;
    assert!(settings.processed_needs_result());

    settings.logging.sync_notification = false;
    settings.logging.detailed_sync_logging = true;
    assert!(settings.processed_needs_result());
}

#[test]
fn test_bitrate_override_wins() {
    let mut settings = Settings::default();
    let size = Size::new(1920, 1080);
    assert_eq!(
        settings.record.bitrate_kbps(size),
        BitratePreset::Medium.bitrate_kbps(1920)
    );

    settings.record.bitrate_override_kbps = Some(12_345);
    assert_eq!(settings.record.bitrate_kbps(size), 12_345);
}
