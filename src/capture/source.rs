use crate::error::CaptureError;
use crate::frame::{FrameData, FrameFormat};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

/// One camera or stream delivering frames, one blocking read at a time
pub trait FrameSource: Send {
    /// Read the next frame, or fail. A failure puts the owning capture
    /// session into its reconnect path.
    fn read_frame(&mut self) -> Result<FrameData, CaptureError>;
}

/// Opens frame sources by locator (RTSP URL, device path, ...)
pub trait FrameSourceFactory: Send + Sync {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Writes frames of one recording to a single output file
pub trait FrameEncoder: Send {
    fn write_frame(&mut self, frame: &FrameData) -> Result<(), CaptureError>;

    /// Finalize and release the output. Must be a no-op when called
    /// more than once.
    fn release(&mut self);
}

/// Creates encoders for a given output path, frame rate and resolution
pub trait FrameEncoderFactory: Send + Sync {
    fn create(
        &self,
        path: &Path,
        fps: u32,
        resolution: (u32, u32),
    ) -> Result<Box<dyn FrameEncoder>, CaptureError>;

    /// Extension for output file names produced by this encoder
    fn file_extension(&self) -> &'static str;
}

/// Synthetic frame source producing a moving gradient at a fixed rate.
///
/// Stands in for a camera on platforms without the GStreamer backend and
/// in examples; paced so downstream consumers see realistic frame timing.
pub struct PatternFrameSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    next_frame_at: Instant,
    frame_id: u64,
}

impl PatternFrameSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            next_frame_at: Instant::now(),
            frame_id: 0,
        }
    }
}

impl FrameSource for PatternFrameSource {
    fn read_frame(&mut self) -> Result<FrameData, CaptureError> {
        let now = Instant::now();
        if now < self.next_frame_at {
            std::thread::sleep(self.next_frame_at - now);
        }
        self.next_frame_at += self.frame_interval;

        let shift = (self.frame_id % 256) as u8;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((x as u8).wrapping_add(shift));
                data.push((y as u8).wrapping_add(shift));
                data.push(shift);
            }
        }

        let frame = FrameData::new(
            self.frame_id,
            SystemTime::now(),
            data,
            self.width,
            self.height,
            FrameFormat::Rgb24,
        );
        self.frame_id += 1;
        Ok(frame)
    }
}

/// Factory for [`PatternFrameSource`]. The locator is only logged; every
/// source produces the same synthetic pattern.
pub struct PatternSourceFactory {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl PatternSourceFactory {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }
}

impl FrameSourceFactory for PatternSourceFactory {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        debug!("Opening synthetic pattern source for locator {}", locator);
        Ok(Box::new(PatternFrameSource::new(
            self.width,
            self.height,
            self.fps,
        )))
    }
}

/// MJPEG file encoder: a concatenated stream of JPEG images.
///
/// Pure-Rust fallback used when the GStreamer encoder is not compiled in.
pub struct MjpegFileEncoder {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    quality: u8,
    frames_written: u64,
}

impl MjpegFileEncoder {
    pub fn create(path: &Path, quality: u8) -> Result<Self, CaptureError> {
        let file = File::create(path).map_err(|e| CaptureError::EncoderOpen {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

        debug!("Created MJPEG encoder for {}", path.display());

        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            quality,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameEncoder for MjpegFileEncoder {
    fn write_frame(&mut self, frame: &FrameData) -> Result<(), CaptureError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| CaptureError::EncoderWrite {
                details: "encoder already released".to_string(),
            })?;

        match frame.format {
            FrameFormat::Mjpeg => {
                writer
                    .write_all(&frame.data)
                    .map_err(|e| CaptureError::EncoderWrite {
                        details: e.to_string(),
                    })?;
            }
            FrameFormat::Rgb24 => {
                let mut encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut *writer, self.quality);
                encoder
                    .encode(&frame.data, frame.width, frame.height, image::ColorType::Rgb8)
                    .map_err(|e| CaptureError::EncoderWrite {
                        details: e.to_string(),
                    })?;
            }
        }

        self.frames_written += 1;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!("Failed to flush {}: {}", self.path.display(), e);
            }
            debug!(
                "Released MJPEG encoder for {} ({} frames)",
                self.path.display(),
                self.frames_written
            );
        }
    }
}

impl Drop for MjpegFileEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Factory for [`MjpegFileEncoder`]
pub struct MjpegEncoderFactory {
    quality: u8,
}

impl MjpegEncoderFactory {
    pub fn new() -> Self {
        Self { quality: 85 }
    }
}

impl Default for MjpegEncoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoderFactory for MjpegEncoderFactory {
    fn create(
        &self,
        path: &Path,
        _fps: u32,
        _resolution: (u32, u32),
    ) -> Result<Box<dyn FrameEncoder>, CaptureError> {
        Ok(Box::new(MjpegFileEncoder::create(path, self.quality)?))
    }

    fn file_extension(&self) -> &'static str {
        "mjpeg"
    }
}
