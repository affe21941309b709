use anyhow::{anyhow, Result};
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{Camera, NokhwaError};
use tracing::{debug, error, info, warn};

use crate::config::CameraConfig;
use crate::error::CameraError;

/// One captured RGB frame, owned so it can move into a detector call.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            data: vec![0u8; buffer_len(width, height, channels)],
            width,
            height,
            channels,
        }
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            channels: 3,
        }
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        if self.channels != 3 {
            return Err(anyhow!("Unsupported channel count: {}", self.channels));
        }
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("Failed to create image buffer"))
    }

    pub fn to_image(&self) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageRgb8(self.to_rgb_image()?))
    }
}

/// Byte length of a tightly packed frame, computed without `u32` overflow.
fn buffer_len(width: u32, height: u32, channels: u32) -> usize {
    width as usize * height as usize * channels as usize
}

/// Live visual frame stream.
///
/// `frame_size` reports `(0, 0)` while the source is inactive or has not
/// produced a frame yet.
pub trait VideoSource {
    fn is_active(&self) -> bool;
    fn activate(&mut self) -> Result<(), CameraError>;
    fn deactivate(&mut self);
    fn frame_size(&self) -> (u32, u32);
    fn current_frame(&mut self) -> Result<Frame>;
}

/// Index and human name of an attached camera.
#[derive(Debug, Clone)]
pub struct CameraDescriptor {
    pub index: String,
    pub name: String,
}

pub fn list_cameras() -> Result<Vec<CameraDescriptor>> {
    let cameras = nokhwa::query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDescriptor {
            index: info.index().to_string(),
            name: info.human_name(),
        })
        .collect())
}

/// Webcam capture through nokhwa.
pub struct CameraSource {
    config: CameraConfig,
    camera: Option<Camera>,
    frame_size: (u32, u32),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Self {
        info!("Creating CameraSource for device {}", config.device_index);
        Self {
            config,
            camera: None,
            frame_size: (0, 0),
        }
    }

    fn requested_format(&self) -> RequestedFormat<'static> {
        let format = CameraFormat::new(
            Resolution::new(self.config.width, self.config.height),
            FrameFormat::MJPEG,
            self.config.fps,
        );
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format))
    }

    fn open(&self) -> Result<(Camera, Frame), NokhwaError> {
        let index = CameraIndex::Index(self.config.device_index);
        let mut camera = Camera::new(index, self.requested_format())?;
        camera.open_stream()?;

        // Grab one frame so the reported size is real before the first tick.
        let first = Self::decode(&mut camera)?;
        Ok((camera, first))
    }

    fn decode(camera: &mut Camera) -> Result<Frame, NokhwaError> {
        let buffer = camera.frame()?;
        let decoded = buffer.decode_image::<RgbFormat>()?;
        let (width, height) = decoded.dimensions();
        Ok(Frame {
            data: decoded.into_raw(),
            width,
            height,
            channels: 3,
        })
    }
}

fn map_open_error(e: NokhwaError) -> CameraError {
    let message = e.to_string();
    if message.to_lowercase().contains("permission") {
        CameraError::PermissionDenied
    } else {
        CameraError::DeviceUnavailable(message)
    }
}

impl VideoSource for CameraSource {
    fn is_active(&self) -> bool {
        self.camera.is_some()
    }

    fn activate(&mut self) -> Result<(), CameraError> {
        if self.camera.is_some() {
            return Ok(());
        }

        info!("Activating camera {}", self.config.device_index);
        let (camera, first) = self.open().map_err(|e| {
            error!("Camera activation failed: {}", e);
            map_open_error(e)
        })?;

        self.frame_size = (first.width, first.height);
        self.camera = Some(camera);
        info!("Camera active at {}x{}", first.width, first.height);
        Ok(())
    }

    fn deactivate(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            match camera.stop_stream() {
                Ok(_) => info!("Camera stream stopped"),
                Err(e) => warn!("Error stopping camera stream: {}", e),
            }
        }
        self.frame_size = (0, 0);
    }

    fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    fn current_frame(&mut self) -> Result<Frame> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| anyhow!("Camera not active"))?;
        let frame = Self::decode(camera).map_err(|e| anyhow!("Camera frame capture error: {}", e))?;
        debug!("Captured camera frame: {}x{}", frame.width, frame.height);
        self.frame_size = (frame.width, frame.height);
        Ok(frame)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if self.camera.is_some() {
            info!("CameraSource being dropped, releasing stream");
            self.deactivate();
        }
    }
}
