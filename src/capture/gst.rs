use crate::capture::source::{FrameEncoder, FrameEncoderFactory, FrameSource, FrameSourceFactory};
use crate::error::CaptureError;
use crate::frame::{FrameData, FrameFormat};
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::{AppSink, AppSrc};
use gstreamer_video::VideoInfo;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Per-read wait before a pull counts as a failed frame
const PULL_TIMEOUT: gstreamer::ClockTime = gstreamer::ClockTime::from_seconds(5);

/// Wait for the encoder pipeline to flush on release
const EOS_TIMEOUT: gstreamer::ClockTime = gstreamer::ClockTime::from_seconds(5);

fn init_gstreamer() -> Result<(), CaptureError> {
    gstreamer::init().map_err(|e| CaptureError::SourceOpen {
        locator: "<gstreamer>".to_string(),
        details: format!("Failed to initialize GStreamer: {}", e),
    })
}

/// Build the source pipeline description for a locator
fn source_pipeline_string(locator: &str) -> String {
    if locator.starts_with("rtsp://") {
        format!(
            "rtspsrc location={} latency=200 ! \
             decodebin ! \
             videoconvert ! video/x-raw,format=RGB ! \
             queue max-size-buffers=4 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=4 drop=true",
            locator
        )
    } else if locator.starts_with("/dev/video") {
        format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             decodebin ! \
             videoconvert ! video/x-raw,format=RGB ! \
             queue max-size-buffers=4 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=4 drop=true",
            locator
        )
    } else {
        format!(
            "uridecodebin uri={} ! \
             videoconvert ! video/x-raw,format=RGB ! \
             appsink name=sink sync=false max-buffers=4 drop=true",
            locator
        )
    }
}

/// GStreamer-backed frame source pulling RGB frames from an appsink
pub struct GstFrameSource {
    pipeline: Pipeline,
    appsink: AppSink,
    locator: String,
    frame_counter: u64,
}

impl GstFrameSource {
    fn open(locator: &str) -> Result<Self, CaptureError> {
        init_gstreamer()?;

        let pipeline_desc = source_pipeline_string(locator);
        debug!("Creating GStreamer source pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CaptureError::SourceOpen {
                locator: locator.to_string(),
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CaptureError::SourceOpen {
                locator: locator.to_string(),
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CaptureError::SourceOpen {
                locator: locator.to_string(),
                details: "Pipeline has no appsink".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CaptureError::SourceOpen {
                locator: locator.to_string(),
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CaptureError::SourceOpen {
                locator: locator.to_string(),
                details: format!("Failed to start pipeline: {}", e),
            })?;

        info!("GStreamer source started for {}", locator);

        Ok(Self {
            pipeline,
            appsink,
            locator: locator.to_string(),
            frame_counter: 0,
        })
    }
}

impl FrameSource for GstFrameSource {
    fn read_frame(&mut self) -> Result<FrameData, CaptureError> {
        let sample =
            self.appsink
                .try_pull_sample(PULL_TIMEOUT)
                .ok_or_else(|| CaptureError::FrameRead {
                    details: format!("No sample from {} within {}", self.locator, PULL_TIMEOUT),
                })?;

        let buffer = sample.buffer().ok_or_else(|| CaptureError::FrameRead {
            details: "No buffer in sample".to_string(),
        })?;
        let caps = sample.caps().ok_or_else(|| CaptureError::FrameRead {
            details: "No caps in sample".to_string(),
        })?;
        let video_info = VideoInfo::from_caps(caps).map_err(|e| CaptureError::FrameRead {
            details: format!("Failed to get video info: {}", e),
        })?;

        let map = buffer.map_readable().map_err(|e| CaptureError::FrameRead {
            details: format!("Failed to map buffer: {}", e),
        })?;

        let frame = FrameData::new(
            self.frame_counter,
            SystemTime::now(),
            map.as_slice().to_vec(),
            video_info.width(),
            video_info.height(),
            FrameFormat::Rgb24,
        );
        self.frame_counter += 1;

        Ok(frame)
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to tear down source pipeline: {}", e);
        }
        debug!("GStreamer source released for {}", self.locator);
    }
}

/// Factory for [`GstFrameSource`]
pub struct GstSourceFactory;

impl FrameSourceFactory for GstSourceFactory {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        Ok(Box::new(GstFrameSource::open(locator)?))
    }
}

/// GStreamer-backed MP4 encoder pushing RGB frames through x264
pub struct GstMp4Encoder {
    pipeline: Pipeline,
    appsrc: AppSrc,
    frame_duration: gstreamer::ClockTime,
    frames_written: u64,
    released: bool,
}

impl GstMp4Encoder {
    fn create(path: &Path, fps: u32, resolution: (u32, u32)) -> Result<Self, CaptureError> {
        init_gstreamer().map_err(|e| CaptureError::EncoderOpen {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

        let (width, height) = resolution;
        let pipeline_desc = format!(
            "appsrc name=src format=time is-live=true \
             caps=video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             videoconvert ! video/x-raw,format=I420 ! \
             x264enc speed-preset=veryfast bitrate=8000 key-int-max=60 ! \
             h264parse config-interval=1 ! \
             mp4mux faststart=true ! \
             filesink location={}",
            width,
            height,
            fps,
            path.to_string_lossy()
        );

        debug!("Creating GStreamer encoder pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CaptureError::EncoderOpen {
                path: path.to_path_buf(),
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CaptureError::EncoderOpen {
                path: path.to_path_buf(),
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| CaptureError::EncoderOpen {
                path: path.to_path_buf(),
                details: "Pipeline has no appsrc".to_string(),
            })?
            .downcast::<AppSrc>()
            .map_err(|_| CaptureError::EncoderOpen {
                path: path.to_path_buf(),
                details: "Failed to downcast to AppSrc".to_string(),
            })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CaptureError::EncoderOpen {
                path: path.to_path_buf(),
                details: format!("Failed to start pipeline: {}", e),
            })?;

        info!("GStreamer MP4 encoder started for {}", path.display());

        Ok(Self {
            pipeline,
            appsrc,
            frame_duration: gstreamer::ClockTime::SECOND / fps.max(1) as u64,
            frames_written: 0,
            released: false,
        })
    }
}

impl FrameEncoder for GstMp4Encoder {
    fn write_frame(&mut self, frame: &FrameData) -> Result<(), CaptureError> {
        if self.released {
            return Err(CaptureError::EncoderWrite {
                details: "encoder already released".to_string(),
            });
        }

        let mut buffer = gstreamer::Buffer::from_slice(frame.data.as_ref().clone());
        {
            let buffer = buffer.get_mut().ok_or_else(|| CaptureError::EncoderWrite {
                details: "Buffer not writable".to_string(),
            })?;
            buffer.set_pts(self.frame_duration * self.frames_written);
            buffer.set_duration(self.frame_duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| CaptureError::EncoderWrite {
                details: format!("Push failed: {:?}", e),
            })?;

        self.frames_written += 1;
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Flush the muxer so the MP4 index gets written
        let _ = self.appsrc.end_of_stream();
        if let Some(bus) = self.pipeline.bus() {
            let _ = bus.timed_pop_filtered(
                EOS_TIMEOUT,
                &[
                    gstreamer::MessageType::Eos,
                    gstreamer::MessageType::Error,
                ],
            );
        }
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to tear down encoder pipeline: {}", e);
        }

        debug!("GStreamer encoder released ({} frames)", self.frames_written);
    }
}

impl Drop for GstMp4Encoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Factory for [`GstMp4Encoder`]
pub struct GstEncoderFactory;

impl FrameEncoderFactory for GstEncoderFactory {
    fn create(
        &self,
        path: &Path,
        fps: u32,
        resolution: (u32, u32),
    ) -> Result<Box<dyn FrameEncoder>, CaptureError> {
        Ok(Box::new(GstMp4Encoder::create(path, fps, resolution)?))
    }

    fn file_extension(&self) -> &'static str {
        "mp4"
    }
}
