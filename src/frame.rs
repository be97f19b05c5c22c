use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Frame format enumeration for the formats this system produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// RGB24 format - uncompressed RGB data
    Rgb24,
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Rgb24 => 3,
            FrameFormat::Mjpeg => 0, // Variable size, compressed
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// Frame data structure containing raw frame data and metadata
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier within its capture session
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: FrameFormat,
}

impl FrameData {
    /// Create a new frame data instance
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true, // Compressed formats have variable size
        }
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Resize an RGB24 frame to the target resolution, returning a new frame.
    ///
    /// Frames already at the target resolution are returned unchanged (the
    /// pixel buffer is shared, not copied). Compressed frames are returned
    /// unchanged as well; resizing happens after decode.
    pub fn resize_to(&self, width: u32, height: u32) -> FrameData {
        if self.format != FrameFormat::Rgb24 || (self.width == width && self.height == height) {
            return self.clone();
        }

        let src: image::ImageBuffer<image::Rgb<u8>, &[u8]> =
            match image::ImageBuffer::from_raw(self.width, self.height, self.data.as_slice()) {
                Some(buf) => buf,
                None => {
                    tracing::warn!(
                        "Frame {} has {} bytes, expected {}x{} RGB24 - returning original",
                        self.id,
                        self.data.len(),
                        self.width,
                        self.height
                    );
                    return self.clone();
                }
            };

        let resized = image::imageops::resize(
            &src,
            width,
            height,
            image::imageops::FilterType::Triangle,
        );

        FrameData {
            id: self.id,
            timestamp: self.timestamp,
            data: Arc::new(resized.into_raw()),
            width,
            height,
            format: FrameFormat::Rgb24,
        }
    }
}
