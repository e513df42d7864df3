//! kbforge core: error taxonomy, configuration and OCR capability discovery.

pub mod capabilities;
pub mod config;
pub mod error;

pub use capabilities::OcrCapability;
pub use config::{ChunkingConfig, DataPaths, InputFolder, KbConfig};
pub use error::{Error, Result};
