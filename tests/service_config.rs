use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::Builder;

use roadscan::config::ServiceConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ROADSCAN_CONFIG",
        "ROADSCAN_API_ADDR",
        "ROADSCAN_OUTPUT_DIR",
        "ROADSCAN_PUBLIC_URL",
        "ROADSCAN_MODEL_PATH",
        "ROADSCAN_FONT_PATH",
        "ROADSCAN_MAX_UPLOAD_BYTES",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "output_dir": "/srv/roadscan/out",
            "api": {
                "addr": "0.0.0.0:9000",
                "public_url": "https://roads.example.org",
                "read_timeout_secs": 5
            },
            "model": {
                "path": "/models/best.onnx",
                "class_names": ["pothole", "plastic", "trash"]
            },
            "detection": { "default_confidence": 0.35, "iou_threshold": 0.5 },
            "video": { "frame_skip": 3 }
        }"#,
    );
    std::env::set_var("ROADSCAN_CONFIG", file.path());
    std::env::set_var("ROADSCAN_API_ADDR", "127.0.0.1:7000");
    std::env::set_var("ROADSCAN_MAX_UPLOAD_BYTES", "1048576");

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:7000");
    assert_eq!(cfg.public_url, "https://roads.example.org");
    assert_eq!(cfg.max_upload_bytes, 1_048_576);
    assert_eq!(cfg.read_timeout.as_secs(), 5);
    assert_eq!(cfg.output_dir, PathBuf::from("/srv/roadscan/out"));
    assert_eq!(cfg.model.path, Some(PathBuf::from("/models/best.onnx")));
    assert_eq!(cfg.model.class_names, vec!["pothole", "plastic", "trash"]);
    assert_eq!(cfg.default_confidence, 0.35);
    assert_eq!(cfg.iou_threshold, 0.5);
    assert_eq!(cfg.video.frame_skip, 3);
    assert_eq!((cfg.video.width, cfg.video.height), (640, 368));

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
output_dir = "/tmp/roadscan-toml"

[api]
addr = "127.0.0.1:8100"

[video]
width = 1280
height = 720
"#,
    );
    std::env::set_var("ROADSCAN_CONFIG", file.path());
    std::env::set_var("ROADSCAN_MODEL_PATH", "/models/override.onnx");

    let cfg = ServiceConfig::load().expect("load toml config");
    assert_eq!(cfg.api_addr, "127.0.0.1:8100");
    assert_eq!(cfg.output_dir, PathBuf::from("/tmp/roadscan-toml"));
    assert_eq!((cfg.video.width, cfg.video.height), (1280, 720));
    assert_eq!(cfg.model.path, Some(PathBuf::from("/models/override.onnx")));

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServiceConfig::load().expect("load defaults");
    assert_eq!(cfg.api_addr, "127.0.0.1:8000");
    assert_eq!(cfg.default_confidence, 0.5);
    assert_eq!(cfg.model.path, None);
    assert!(cfg.output_dir.ends_with("roadscan-output"));
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".json", r#"{ "video": { "frame_skip": 0 } }"#);
    std::env::set_var("ROADSCAN_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());

    let file = config_file(".json", r#"{ "detection": { "iou_threshold": 2.0 } }"#);
    std::env::set_var("ROADSCAN_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());

    let file = config_file(".json", "{ not json");
    std::env::set_var("ROADSCAN_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());

    clear_env();
    std::env::set_var("ROADSCAN_MAX_UPLOAD_BYTES", "lots");
    assert!(ServiceConfig::load().is_err());

    clear_env();
}
