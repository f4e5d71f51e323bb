//! roadscan - Batch road defect detection over a directory of media.
//!
//! Scans `images/` and `videos/` below `--input` (or `--input` itself) and
//! prints one line per file naming the raw model labels found, followed by
//! the per-category counts.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::RgbImage;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use roadscan::{
    category::CategoryCounts,
    detect::{load_model, BackendKind, ModelHandle},
    media::{self, LabelFont, VideoSink},
    output::OutputStore,
    pipeline::{detect_image, process_video, PipelineSettings},
    ui::{Ui, UiMode},
    ServiceConfig,
};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];
const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

#[derive(Parser, Debug)]
#[command(name = "roadscan", about = "Detect potholes and litter in road media")]
struct Args {
    /// Directory holding images/ and videos/, or media files directly
    #[arg(long, value_name = "DIR")]
    input: PathBuf,

    /// Minimum detection confidence
    #[arg(long, default_value_t = 0.5, value_parser = parse_confidence)]
    confidence: f32,

    /// Write annotated outputs here
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Detector backend (defaults to tract when a model is configured)
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// ONNX model path (overrides ROADSCAN_MODEL_PATH / config)
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value = "auto")]
    ui: UiMode,
}

fn parse_confidence(raw: &str) -> Result<f32, String> {
    let value: f32 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err("confidence must be within [0, 1]".to_string());
    }
    Ok(value)
}

/// Drops frames when no output directory was requested.
struct DiscardFrames;

impl VideoSink for DiscardFrames {
    fn write_frame(&mut self, _frame: &RgbImage) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one scanned file.
struct Scanned {
    counts: CategoryCounts,
    /// Raw labels: one per box for images, distinct labels for videos.
    labels: Vec<String>,
    saved: Option<PathBuf>,
}

struct Scan<'a> {
    model: &'a ModelHandle,
    settings: PipelineSettings,
    store: Option<OutputStore>,
    font: Option<LabelFont>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = Ui::new(
        args.ui,
        std::io::stderr().is_terminal(),
        !std::io::stdout().is_terminal(),
    );

    let mut config = ServiceConfig::load()?;
    if let Some(path) = &args.model {
        config.model.path = Some(path.clone());
    }
    let kind = args
        .backend
        .unwrap_or_else(|| BackendKind::preferred(&config.model));

    let (images, videos) = {
        let _stage = ui.stage("Scan input");
        collect_media(&args.input)?
    };
    if images.is_empty() && videos.is_empty() {
        return Err(anyhow!("no images or videos found under {}", args.input.display()));
    }

    let model = {
        let _stage = ui.stage("Load detector");
        let model = load_model(kind, &config.model)?;
        model.warm_up()?;
        model
    };
    if kind == BackendKind::Scripted {
        log::warn!("scripted backend selected, no detections will be reported");
    }

    let scan = Scan {
        model: &model,
        settings: config.pipeline_settings(args.confidence),
        store: match &args.out {
            Some(dir) => Some(OutputStore::new(dir, "file://")?),
            None => None,
        },
        font: match &config.font_path {
            Some(path) => Some(LabelFont::load(path)?),
            None => None,
        },
    };

    let bar = ui.files((images.len() + videos.len()) as u64);
    let mut totals = CategoryCounts::default();
    let mut failures = 0usize;
    for (path, is_video) in images
        .iter()
        .map(|p| (p, false))
        .chain(videos.iter().map(|p| (p, true)))
    {
        let name = display_name(path);
        bar.set_message(name.clone());
        let result = if is_video {
            scan.video(path)
        } else {
            scan.image(path)
        };
        bar.inc(1);
        match result {
            Ok(scanned) => {
                bar.suspend(|| report(&name, &scanned));
                totals += scanned.counts;
            }
            Err(err) => {
                failures += 1;
                bar.suspend(|| eprintln!("[ERROR] {}: {:#}", name, err));
            }
        }
    }
    bar.finish_and_clear();

    println!();
    println!(
        "totals: pothole={} plastic={} otherlitter={}",
        totals.pothole, totals.plastic, totals.otherlitter
    );
    if failures > 0 {
        return Err(anyhow!("{} file(s) could not be processed", failures));
    }
    Ok(())
}

impl Scan<'_> {
    fn image(&self, path: &Path) -> Result<Scanned> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let image = media::decode_image(&bytes)?;
        let report = detect_image(self.model, &image, &self.settings, self.font.as_ref())?;
        let saved = match &self.store {
            Some(store) => {
                let name = store.save(&media::encode_jpeg(&report.annotated)?, "jpg")?;
                Some(store.dir().join(name))
            }
            None => None,
        };
        Ok(Scanned {
            counts: report.counts,
            labels: report.detections.into_iter().map(|det| det.label).collect(),
            saved,
        })
    }

    fn video(&self, path: &Path) -> Result<Scanned> {
        let mut source = media::open_video_file(path)?;
        let Some(store) = &self.store else {
            let report = process_video(
                self.model,
                source.as_mut(),
                &mut DiscardFrames,
                &self.settings,
                self.font.as_ref(),
            )?;
            return Ok(Scanned {
                counts: report.counts,
                labels: report.labels,
                saved: None,
            });
        };

        let (_, out_path) = store.allocate("mp4");
        let result = media::create_video_file(
            &out_path,
            self.settings.video_width,
            self.settings.video_height,
            source.fps(),
        )
        .and_then(|mut sink| {
            process_video(
                self.model,
                source.as_mut(),
                sink.as_mut(),
                &self.settings,
                self.font.as_ref(),
            )
        });
        match result {
            Ok(report) => Ok(Scanned {
                counts: report.counts,
                labels: report.labels,
                saved: Some(out_path),
            }),
            Err(err) => {
                store.discard(&out_path);
                Err(err)
            }
        }
    }
}

fn report(name: &str, scanned: &Scanned) {
    println!("{}", detected_line(name, &scanned.labels));
    if !scanned.labels.is_empty() {
        let counts = &scanned.counts;
        println!(
            "    pothole={} plastic={} otherlitter={}",
            counts.pothole, counts.plastic, counts.otherlitter
        );
    }
    if let Some(path) = &scanned.saved {
        println!("    saved {}", path.display());
    }
}

fn detected_line(name: &str, labels: &[String]) -> String {
    if labels.is_empty() {
        return format!("[NO DETECTION] {}", name);
    }
    let quoted: Vec<String> = labels.iter().map(|label| format!("'{}'", label)).collect();
    format!("[DETECTED] {} → [{}]", name, quoted.join(", "))
}

fn collect_media(input: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    if !input.is_dir() {
        return Err(anyhow!("{} is not a directory", input.display()));
    }
    let images_dir = input.join("images");
    let videos_dir = input.join("videos");
    if images_dir.is_dir() || videos_dir.is_dir() {
        Ok((
            list_with_extensions(&images_dir, &IMAGE_EXTENSIONS)?,
            list_with_extensions(&videos_dir, &VIDEO_EXTENSIONS)?,
        ))
    } else {
        Ok((
            list_with_extensions(input, &IMAGE_EXTENSIONS)?,
            list_with_extensions(input, &VIDEO_EXTENSIONS)?,
        ))
    }
}

fn list_with_extensions(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
