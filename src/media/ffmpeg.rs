//! FFmpeg-backed video decoding and H.264 encoding.
//!
//! Frames are converted to/from packed RGB24 in memory. Open failures are
//! reported as invalid input; failures after the stream is open are I/O errors.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{self, flag::Flags};
use ffmpeg::Rational;
use image::RgbImage;

use super::video::{sanitize_fps, VideoSink, VideoSource};
use crate::error::MediaError;

pub(crate) struct FfmpegVideoSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: scaling::Context,
    fps: f64,
    eof_sent: bool,
}

impl FfmpegVideoSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path).map_err(|e| {
            MediaError::invalid_media(format!("cannot open video {}: {e}", path.display()))
        })?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| MediaError::invalid_media("file has no video track"))?;
        let stream_index = input_stream.index();
        let fps = sanitize_fps(f64::from(input_stream.avg_frame_rate()));
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| MediaError::invalid_media(format!("bad video parameters: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| MediaError::invalid_media(format!("no decoder for video: {e}")))?;

        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::debug!(
            "video opened: {} ({}x{} @ {:.2} fps)",
            path.display(),
            decoder.width(),
            decoder.height(),
            fps
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            eof_sent: false,
        })
    }

    fn receive(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .map_err(|e| MediaError::io(format!("scale frame to RGB: {e}")))?;
        frame_to_image(&rgb_frame).map(Some)
    }
}

impl VideoSource for FfmpegVideoSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if let Some(frame) = self.receive()? {
            return Ok(Some(frame));
        }
        if self.eof_sent {
            return Ok(None);
        }

        loop {
            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            let Some((index, packet)) = next else {
                break;
            };
            if index != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .map_err(|e| MediaError::io(format!("send packet to decoder: {e}")))?;
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
        }

        self.decoder
            .send_eof()
            .map_err(|e| MediaError::io(format!("flush decoder: {e}")))?;
        self.eof_sent = true;
        self.receive()
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("decoded frame buffer has wrong size"))
}

pub(crate) struct FfmpegVideoSink {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: scaling::Context,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    pts: i64,
}

impl FfmpegVideoSink {
    pub(crate) fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = ffmpeg::format::output(&path)
            .map_err(|e| MediaError::io(format!("create {}: {e}", path.display())))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
            .ok_or_else(|| MediaError::io("H.264 encoder not available"))?;
        let frame_rate = Rational::new((fps * 1000.0).round() as i32, 1000);
        let encoder_time_base = frame_rate.invert();

        let (encoder, stream_index) = {
            let mut stream = output.add_stream(codec).context("add output stream")?;
            let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .context("create video encoder")?;
            encoder.set_width(width);
            encoder.set_height(height);
            encoder.set_format(Pixel::YUV420P);
            encoder.set_time_base(encoder_time_base);
            encoder.set_frame_rate(Some(frame_rate));
            if global_header {
                encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
            }
            let encoder = encoder
                .open_as(codec)
                .map_err(|e| MediaError::io(format!("open H.264 encoder: {e}")))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            (encoder, stream.index())
        };

        output
            .write_header()
            .map_err(|e| MediaError::io(format!("write container header: {e}")))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(encoder_time_base);

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width,
            height,
            pts: 0,
        })
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| MediaError::io(format!("write packet: {e}")))?;
        }
        Ok(())
    }
}

impl VideoSink for FfmpegVideoSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "frame size {}x{} does not match encoder {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }
        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data_mut(0);
        for (row, chunk) in frame.as_raw().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            data[start..start + row_bytes].copy_from_slice(chunk);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .map_err(|e| MediaError::io(format!("scale frame to YUV: {e}")))?;
        yuv.set_pts(Some(self.pts));
        self.pts += 1;

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| MediaError::io(format!("encode frame {}: {e}", self.pts)))?;
        self.drain_packets()
    }

    fn finish(&mut self) -> Result<()> {
        self.encoder
            .send_eof()
            .map_err(|e| MediaError::io(format!("flush encoder: {e}")))?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .map_err(|e| MediaError::io(format!("write container trailer: {e}")))?;
        Ok(())
    }
}
