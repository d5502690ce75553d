use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera device selected")]
    NoDevice,

    #[error("camera is already running")]
    AlreadyRunning,

    #[error("camera is not running")]
    NotRunning,

    #[error("no frame has been received yet")]
    NoFrame,

    #[error("camera device not found: {identify}")]
    DeviceNotFound { identify: String },

    #[error("pixel layout {layout} is not accepted by the frame sink")]
    UnsupportedLayout { layout: String },

    #[error("{backend} backend error: {reason}")]
    Backend {
        backend: &'static str,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nokhwa error: {0}")]
    Nokhwa(#[from] nokhwa::NokhwaError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl CameraError {
    pub fn backend(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            reason: reason.into(),
        }
    }

    pub fn unsupported(layout: impl Into<String>) -> Self {
        Self::UnsupportedLayout {
            layout: layout.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;
