use anyhow::Result;
use image::{ImageFormat, RgbImage};
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use tempfile::tempdir;

use roadscan::api::{ApiHandle, ApiServer};
use roadscan::detect::{BoundingBox, Detection, ModelHandle, ScriptedBackend};
use roadscan::ServiceConfig;

const BOUNDARY: &str = "roadscan-test-boundary";

fn det(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32, label: &str) -> Detection {
    Detection::new(BoundingBox::new(x1, y1, x2, y2), conf, label)
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    RgbImage::from_pixel(width, height, image::Rgb([90, 90, 90]))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn multipart_body(filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

struct Reply {
    head: String,
    body: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

struct TestApi {
    dir: tempfile::TempDir,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(backend: ScriptedBackend, tweak: impl FnOnce(&mut ServiceConfig)) -> Result<Self> {
        let dir = tempdir()?;
        let mut cfg = ServiceConfig::default();
        cfg.api_addr = "127.0.0.1:0".to_string();
        cfg.public_url = "http://roadscan.test/".to_string();
        cfg.output_dir = dir.path().join("output");
        tweak(&mut cfg);

        let api_handle = ApiServer::new(cfg, ModelHandle::new(backend)).spawn()?;
        Ok(Self {
            dir,
            api_handle: Some(api_handle),
        })
    }

    /// Names of everything currently in the output directory.
    fn outputs(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path().join("output"))
            .expect("output dir")
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn send(&self, head: &str, body: &[u8]) -> Result<Reply> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        stream.write_all(head.as_bytes())?;
        stream.write_all(body)?;
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response header terminator");
        Ok(Reply {
            head: String::from_utf8_lossy(&raw[..split]).into_owned(),
            body: raw[split + 4..].to_vec(),
        })
    }

    fn get(&self, path: &str) -> Result<Reply> {
        self.send(&format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"), &[])
    }

    fn post_file(&self, path: &str, filename: &str, data: &[u8]) -> Result<Reply> {
        let body = multipart_body(filename, data);
        let head = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        self.send(&head, &body)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn health_reports_backend() -> Result<()> {
    let api = TestApi::new(ScriptedBackend::default(), |_| {})?;
    let reply = api.get("/health")?;
    assert!(reply.head.contains("200 OK"));
    assert_eq!(reply.json()["status"], "ok");
    assert_eq!(reply.json()["backend"], "scripted");
    Ok(())
}

#[test]
fn image_detection_dedups_counts_and_serves_result() -> Result<()> {
    let backend = ScriptedBackend::default().with_frames(vec![vec![
        det(0.0, 0.0, 10.0, 10.0, 0.9, "pothole"),
        det(1.0, 1.0, 10.0, 10.0, 0.8, "pothole"),
        det(0.0, 0.0, 10.0, 10.0, 0.95, "plastic"),
    ]]);
    let api = TestApi::new(backend, |_| {})?;

    let reply = api.post_file("/detect/image?confidence=0.5", "road.png", &png_bytes(320, 240))?;
    assert!(reply.head.contains("200 OK"), "{}", reply.head);
    let value = reply.json();
    assert_eq!(
        value["counts"],
        serde_json::json!({"pothole": 1, "plastic": 1, "otherlitter": 0})
    );
    assert_eq!(value["detections"].as_array().map(Vec::len), Some(2));

    let url = value["image_url"].as_str().expect("image_url");
    let path = url
        .strip_prefix("http://roadscan.test")
        .expect("public base url without doubled slash");
    assert!(path.starts_with("/static/output/"));
    assert!(path.ends_with(".jpg"));

    let served = api.get(path)?;
    assert!(served.head.contains("200 OK"));
    assert!(served.head.contains("Content-Type: image/jpeg"));
    assert_eq!(&served.body[..2], &[0xFF, 0xD8]);
    Ok(())
}

#[test]
fn raw_body_upload_is_accepted() -> Result<()> {
    let backend = ScriptedBackend::default()
        .with_frames(vec![vec![det(5.0, 5.0, 50.0, 50.0, 0.7, "bottle")]]);
    let api = TestApi::new(backend, |_| {})?;

    let png = png_bytes(64, 64);
    let head = format!(
        "POST /detect/image HTTP/1.1\r\nHost: localhost\r\nContent-Type: image/png\r\nContent-Length: {}\r\n\r\n",
        png.len()
    );
    let reply = api.send(&head, &png)?;
    assert!(reply.head.contains("200 OK"), "{}", reply.head);
    assert_eq!(reply.json()["counts"]["otherlitter"], 1);
    Ok(())
}

#[test]
fn confidence_outside_unit_interval_is_rejected() -> Result<()> {
    let api = TestApi::new(ScriptedBackend::default(), |_| {})?;
    for query in ["confidence=1.5", "confidence=-0.1", "confidence=high"] {
        let reply = api.post_file(&format!("/detect/image?{query}"), "a.png", &png_bytes(8, 8))?;
        assert!(reply.head.contains("400 Bad Request"), "{query}: {}", reply.head);
        assert_eq!(reply.json()["error"], "invalid_confidence");
    }
    Ok(())
}

#[test]
fn undecodable_image_is_bad_request() -> Result<()> {
    let backend = ScriptedBackend::default();
    let api = TestApi::new(backend, |_| {})?;
    let reply = api.post_file("/detect/image", "notes.txt", b"definitely not an image")?;
    assert!(reply.head.contains("400 Bad Request"));
    assert_eq!(reply.json()["error"], "invalid_media");
    Ok(())
}

#[test]
fn missing_file_is_bad_request() -> Result<()> {
    let api = TestApi::new(ScriptedBackend::default(), |_| {})?;
    let reply = api.send(
        "POST /detect/image HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n",
        &[],
    )?;
    assert!(reply.head.contains("400 Bad Request"));
    assert_eq!(reply.json()["error"], "missing_file");
    Ok(())
}

#[test]
fn oversized_upload_is_refused_before_reading() -> Result<()> {
    let api = TestApi::new(ScriptedBackend::default(), |cfg| {
        cfg.max_upload_bytes = 1024;
    })?;
    let reply = api.send(
        "POST /detect/image HTTP/1.1\r\nHost: localhost\r\nContent-Type: image/png\r\nContent-Length: 4096\r\n\r\n",
        &[],
    )?;
    assert!(reply.head.contains("413 Payload Too Large"));
    assert_eq!(reply.json()["error"], "payload_too_large");
    Ok(())
}

#[test]
fn unknown_routes_and_methods() -> Result<()> {
    let api = TestApi::new(ScriptedBackend::default(), |_| {})?;

    let reply = api.get("/nope")?;
    assert!(reply.head.contains("404 Not Found"));

    let reply = api.get("/detect/image")?;
    assert!(reply.head.contains("405 Method Not Allowed"));

    let reply = api.get("/static/output/../../etc/passwd")?;
    assert!(reply.head.contains("404 Not Found"));

    let reply = api.get("/static/output/0123456789abcdef0123456789abcdef.jpg")?;
    assert!(reply.head.contains("404 Not Found"));
    Ok(())
}

#[test]
fn preflight_gets_cors_headers() -> Result<()> {
    let api = TestApi::new(ScriptedBackend::default(), |_| {})?;
    let reply = api.send(
        "OPTIONS /detect/video HTTP/1.1\r\nHost: localhost\r\nOrigin: http://ui.test\r\n\r\n",
        &[],
    )?;
    assert!(reply.head.contains("204 No Content"));
    assert!(reply.head.contains("Access-Control-Allow-Origin: *"));
    assert!(reply.body.is_empty());
    Ok(())
}

#[test]
fn root_describes_service() -> Result<()> {
    let api = TestApi::new(ScriptedBackend::default(), |_| {})?;
    let value = api.get("/")?.json();
    assert_eq!(value["service"], "roadscan");
    assert!(value["endpoints"].as_array().is_some_and(|e| !e.is_empty()));
    Ok(())
}

#[cfg(not(feature = "video-ffmpeg"))]
#[test]
fn video_route_reports_missing_decoder_and_leaves_no_output() -> Result<()> {
    let api = TestApi::new(ScriptedBackend::default(), |_| {})?;
    let reply = api.post_file("/detect/video", "clip.mp4", b"not a video at all")?;
    assert!(reply.head.contains("500 Internal Server Error"), "{}", reply.head);
    let value = reply.json();
    assert_eq!(value["error"], "internal_error");
    assert!(value["message"]
        .as_str()
        .is_some_and(|m| m.contains("video-ffmpeg")));
    assert!(api.outputs().is_empty());
    Ok(())
}

#[cfg(feature = "video-ffmpeg")]
fn mp4_bytes(frames: usize) -> Vec<u8> {
    use roadscan::media::VideoSink;

    let dir = tempdir().unwrap();
    let path = dir.path().join("clip.mp4");
    let mut sink = roadscan::media::create_video_file(&path, 64, 48, 10.0).unwrap();
    for i in 0..frames {
        let shade = (i * 40) as u8;
        sink.write_frame(&RgbImage::from_pixel(64, 48, image::Rgb([shade, 80, 120])))
            .unwrap();
    }
    sink.finish().unwrap();
    drop(sink);
    std::fs::read(&path).unwrap()
}

#[cfg(feature = "video-ffmpeg")]
#[test]
fn video_detection_counts_tracks_and_serves_clip() -> Result<()> {
    let backend = ScriptedBackend::default().with_frames(vec![
        vec![det(100.0, 100.0, 200.0, 200.0, 0.9, "pothole")],
        vec![det(104.0, 100.0, 204.0, 200.0, 0.9, "pothole")],
    ]);
    let api = TestApi::new(backend, |_| {})?;

    let reply = api.post_file("/detect/video", "clip.mp4", &mp4_bytes(4))?;
    assert!(reply.head.contains("200 OK"), "{}", reply.head);
    let value = reply.json();
    assert_eq!(
        value["counts"],
        serde_json::json!({"pothole": 1, "plastic": 0, "otherlitter": 0})
    );
    assert_eq!(value["frames_total"], 4);
    assert_eq!(value["frames_analyzed"], 2);

    let url = value["video_url"].as_str().expect("video_url");
    let (path, cache_buster) = url
        .strip_prefix("http://roadscan.test")
        .and_then(|rest| rest.split_once("?t="))
        .expect("public url with cache buster");
    assert_eq!(cache_buster.len(), 32);
    assert!(path.ends_with(".mp4"));
    assert_eq!(api.outputs().len(), 1);

    let served = api.get(path)?;
    assert!(served.head.contains("200 OK"));
    assert!(served.head.contains("Content-Type: video/mp4"));
    assert!(!served.body.is_empty());
    Ok(())
}

#[cfg(feature = "video-ffmpeg")]
#[test]
fn undecodable_video_is_bad_request_and_leaves_no_output() -> Result<()> {
    let api = TestApi::new(ScriptedBackend::default(), |_| {})?;
    let reply = api.post_file("/detect/video", "clip.mp4", b"not a video at all")?;
    assert!(reply.head.contains("400 Bad Request"), "{}", reply.head);
    assert_eq!(reply.json()["error"], "invalid_media");
    assert!(api.outputs().is_empty());
    Ok(())
}
