//! rollcall-hw: frame acquisition for the kiosk.
//!
//! Provides V4L2 webcam capture and a still-photo source behind the
//! common [`FrameSource`] trait.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{CaptureBatch, FrameSource, StillImageSource};
