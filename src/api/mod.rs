//! Detection HTTP API.
//!
//! A single accept loop on its own thread. Requests are handled one at a time,
//! so a long video blocks later requests until it finishes.

use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::detect::ModelHandle;
use crate::error::media_error;
use crate::media::{self, LabelFont};
use crate::output::{content_type_for, OutputStore, OUTPUT_ROUTE};
use crate::pipeline::{detect_image, process_video};

pub mod http;
pub mod multipart;

use http::{read_request, write_response, HttpError, HttpRequest, Response};

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ServiceConfig,
    model: ModelHandle,
}

impl ApiServer {
    pub fn new(cfg: ServiceConfig, model: ModelHandle) -> Self {
        Self { cfg, model }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .api_addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.api_addr))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let store = OutputStore::new(&self.cfg.output_dir, &self.cfg.public_url)?;
        let font = match &self.cfg.font_path {
            Some(path) => Some(LabelFont::load(path)?),
            None => None,
        };
        let service = Service {
            cfg: self.cfg,
            model: self.model,
            store,
            font,
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, service, shutdown_thread) {
                log::error!("detection api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct Service {
    cfg: ServiceConfig,
    model: ModelHandle,
    store: OutputStore,
    font: Option<LabelFont>,
}

fn run_api(listener: TcpListener, service: Service, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &service) {
                    log::warn!("detection api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, service: &Service) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(service.cfg.read_timeout))?;

    let request = match read_request(&mut stream, service.cfg.max_upload_bytes) {
        Ok(request) => request,
        Err(err) => {
            if let Some(http_err) = err.downcast_ref::<HttpError>() {
                let response = Response::error(http_err.status, http_err.code, &http_err.message);
                write_response(&mut stream, &response)?;
            }
            return Err(err);
        }
    };

    let response = match service.route(&request) {
        Ok(response) => {
            log::debug!("{} {} -> {}", request.method, request.path, response.status);
            response
        }
        Err(err) => {
            let response = error_response(&err);
            log::warn!(
                "{} {} failed ({}): {:#}",
                request.method,
                request.path,
                response.status,
                err
            );
            response
        }
    };
    write_response(&mut stream, &response)
}

fn error_response(err: &anyhow::Error) -> Response {
    if let Some(http_err) = err.downcast_ref::<HttpError>() {
        return Response::error(http_err.status, http_err.code, &http_err.message);
    }
    if let Some(media_err) = media_error(err) {
        let status = if media_err.is_invalid_input() { 400 } else { 500 };
        return Response::error(status, media_err.code, &media_err.message);
    }
    Response::error(500, "internal_error", &format!("{:#}", err))
}

impl Service {
    fn route(&self, request: &HttpRequest) -> Result<Response> {
        if request.method == "OPTIONS" {
            return Ok(Response::empty(204));
        }
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/") => Ok(self.describe()),
            ("GET", "/health") => Ok(Response::json(
                200,
                &serde_json::json!({ "status": "ok", "backend": self.model.name() }),
            )),
            ("GET", path) if path.starts_with(OUTPUT_ROUTE) => {
                self.serve_output(&path[OUTPUT_ROUTE.len()..])
            }
            ("POST", "/detect/image") => self.detect_image(request),
            ("POST", "/detect/video") => self.detect_video(request),
            (_, "/" | "/health" | "/detect/image" | "/detect/video") => Err(HttpError::new(
                405,
                "method_not_allowed",
                format!("{} not allowed on {}", request.method, request.path),
            )
            .into()),
            _ => Err(HttpError::new(404, "not_found", "no such route").into()),
        }
    }

    fn describe(&self) -> Response {
        Response::json(
            200,
            &serde_json::json!({
                "service": "roadscan",
                "version": env!("CARGO_PKG_VERSION"),
                "backend": self.model.name(),
                "endpoints": [
                    "POST /detect/image?confidence=<0..1>",
                    "POST /detect/video?confidence=<0..1>",
                    "GET /static/output/<file>",
                    "GET /health",
                ],
            }),
        )
    }

    fn serve_output(&self, name: &str) -> Result<Response> {
        let path = self
            .store
            .resolve(name)
            .map_err(|_| HttpError::new(404, "not_found", "no such output"))?;
        let body = std::fs::read(&path)
            .with_context(|| format!("failed to read output {}", path.display()))?;
        Ok(Response {
            status: 200,
            content_type: content_type_for(name),
            body,
        })
    }

    fn confidence(&self, request: &HttpRequest) -> Result<f32> {
        let Some(raw) = request.query_param("confidence") else {
            return Ok(self.cfg.default_confidence);
        };
        match raw.parse::<f32>() {
            Ok(value) if (0.0..=1.0).contains(&value) => Ok(value),
            _ => Err(HttpError::new(
                400,
                "invalid_confidence",
                "confidence must be a number within [0, 1]",
            )
            .into()),
        }
    }

    fn detect_image(&self, request: &HttpRequest) -> Result<Response> {
        let confidence = self.confidence(request)?;
        let upload = upload_bytes(request)?;
        let image = media::decode_image(upload)?;

        let settings = self.cfg.pipeline_settings(confidence);
        let report = detect_image(&self.model, &image, &settings, self.font.as_ref())?;
        let jpeg = media::encode_jpeg(&report.annotated)?;
        let name = self.store.save(&jpeg, "jpg")?;

        log::info!(
            "POST /detect/image: {} detections, counts {:?} -> {}",
            report.detections.len(),
            report.counts,
            name
        );
        Ok(Response::json(
            200,
            &serde_json::json!({
                "image_url": self.store.url_for(&name),
                "counts": report.counts,
                "detections": report.detections,
            }),
        ))
    }

    fn detect_video(&self, request: &HttpRequest) -> Result<Response> {
        let confidence = self.confidence(request)?;
        let upload = upload_bytes(request)?;

        let mut tmp = tempfile::Builder::new()
            .prefix("roadscan-upload-")
            .suffix(".mp4")
            .tempfile()
            .context("create upload temp file")?;
        tmp.write_all(upload).context("write upload temp file")?;
        tmp.flush()?;

        let mut source = media::open_video_file(tmp.path())?;
        let settings = self.cfg.pipeline_settings(confidence);
        let (name, path) = self.store.allocate("mp4");
        let result = media::create_video_file(
            &path,
            settings.video_width,
            settings.video_height,
            source.fps(),
        )
        .and_then(|mut sink| {
            process_video(
                &self.model,
                source.as_mut(),
                sink.as_mut(),
                &settings,
                self.font.as_ref(),
            )
        });
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                self.store.discard(&path);
                return Err(err);
            }
        };

        log::info!(
            "POST /detect/video: {} frames ({} analyzed), counts {:?} -> {}",
            report.frames_total,
            report.frames_analyzed,
            report.counts,
            name
        );
        Ok(Response::json(
            200,
            &serde_json::json!({
                "video_url": self.store.fresh_url_for(&name),
                "counts": report.counts,
                "frames_total": report.frames_total,
                "frames_analyzed": report.frames_analyzed,
            }),
        ))
    }
}

/// The uploaded media: the `file` form field for multipart bodies, else the raw body.
fn upload_bytes(request: &HttpRequest) -> Result<&[u8]> {
    let content_type = request.header("content-type").unwrap_or("");
    let data = if content_type
        .to_lowercase()
        .starts_with("multipart/form-data")
    {
        let boundary = multipart::boundary(content_type)
            .ok_or_else(|| HttpError::new(400, "bad_request", "multipart boundary missing"))?;
        let parts = multipart::parse(&request.body, &boundary)
            .map_err(|e| HttpError::new(400, "bad_request", e.to_string()))?;
        multipart::file_part(&parts)
            .map(|part| part.data)
            .ok_or_else(|| HttpError::new(400, "missing_file", "no file field in form"))?
    } else {
        request.body.as_slice()
    };
    if data.is_empty() {
        return Err(HttpError::new(400, "missing_file", "empty upload").into());
    }
    Ok(data)
}
