use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use edgeview::config::EdgeviewConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "EDGEVIEW_CONFIG",
        "EDGEVIEW_OUTPUT_DIR",
        "EDGEVIEW_LOG",
        "EDGEVIEW_CAMERA_DEVICE",
        "EDGEVIEW_CAMERA_WIDTH",
        "EDGEVIEW_CAMERA_HEIGHT",
        "EDGEVIEW_CAMERA_FPS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = EdgeviewConfig::load().expect("load config");
    assert_eq!(cfg.output_dir, PathBuf::from("edgeview-out"));
    assert_eq!(cfg.log_filter, "info");
    assert_eq!(cfg.camera.device, "stub://camera");
    assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
    assert_eq!(cfg.camera.target_fps, 15);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "output_dir": "/var/lib/edgeview/out",
        "log_filter": "edgeview=debug",
        "camera": {
            "device": "/dev/video2",
            "width": 1280,
            "height": 720,
            "target_fps": 30
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("EDGEVIEW_CONFIG", file.path());
    std::env::set_var("EDGEVIEW_CAMERA_DEVICE", "stub://bench");
    std::env::set_var("EDGEVIEW_CAMERA_FPS", "5");

    let cfg = EdgeviewConfig::load().expect("load config");
    assert_eq!(cfg.output_dir, PathBuf::from("/var/lib/edgeview/out"));
    assert_eq!(cfg.log_filter, "edgeview=debug");
    assert_eq!(cfg.camera.device, "stub://bench");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.camera.target_fps, 5);

    clear_env();
}

#[test]
fn rejects_zero_camera_size() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("EDGEVIEW_CAMERA_WIDTH", "0");
    let err = EdgeviewConfig::load().unwrap_err();
    assert!(err.to_string().contains("camera size"));

    clear_env();
}

#[test]
fn rejects_malformed_numeric_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("EDGEVIEW_CAMERA_HEIGHT", "tall");
    let err = EdgeviewConfig::load().unwrap_err();
    assert!(err.to_string().contains("EDGEVIEW_CAMERA_HEIGHT"));

    clear_env();
}

#[test]
fn rejects_unreadable_config_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var("EDGEVIEW_CONFIG", dir.path().join("absent.json"));
    assert!(EdgeviewConfig::load().is_err());

    clear_env();
}
