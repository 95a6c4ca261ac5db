pub mod omniparser;
#[cfg(feature = "desktop")]
pub mod screenshot;
pub mod service;
pub mod traits;
pub mod types;
#[cfg(windows)]
pub mod ui_automation;
#[cfg(feature = "onnx")]
pub mod yolo_detector;
