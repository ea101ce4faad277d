pub mod camera;
pub mod config;
pub mod console;
pub mod control;
pub mod detect;
pub mod geometry;
pub mod monitor;
pub mod ocr;
pub mod pipeline;
#[cfg(feature = "desktop")]
pub mod render;
pub mod zone;
