//! Diagnostics sink seam.
//!
//! The pipeline emits intermediate images and observational statistics
//! through this trait. Sinks are strictly fire-and-forget: a sink must never
//! block the pipeline, and write failures are swallowed.

use std::path::PathBuf;

use image::{GrayImage, RgbImage};

/// Receiver for named diagnostic artifacts.
///
/// The default method bodies discard everything, so sinks only override what
/// they care about. Absence of a sink never changes pipeline behavior.
pub trait DiagnosticsSink: Send + Sync {
    /// Whether image artifacts will be consumed at all. Producers may skip
    /// assembling expensive visualizations when this is false.
    fn wants_images(&self) -> bool {
        false
    }

    fn put_gray(&self, name: &str, image: &GrayImage) {
        let _ = (name, image);
    }

    fn put_rgb(&self, name: &str, image: &RgbImage) {
        let _ = (name, image);
    }

    fn put_stat(&self, name: &str, key: &str, value: f64) {
        let _ = (name, key, value);
    }
}

/// Sink that discards all artifacts.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl DiagnosticsSink for NoopSink {}

/// Sink that dumps artifacts as PNG files into a directory.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn save(&self, name: &str, save: impl FnOnce(&std::path::Path) -> image::ImageResult<()>) {
        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            log::debug!("diagnostics dir {:?} unavailable: {err}", self.dir);
            return;
        }
        let path = self.dir.join(format!("{name}.png"));
        if let Err(err) = save(&path) {
            log::debug!("failed to write diagnostic {:?}: {err}", path);
        }
    }
}

impl DiagnosticsSink for DirectorySink {
    fn wants_images(&self) -> bool {
        true
    }

    fn put_gray(&self, name: &str, image: &GrayImage) {
        self.save(name, |path| image.save(path));
    }

    fn put_rgb(&self, name: &str, image: &RgbImage) {
        self.save(name, |path| image.save(path));
    }

    fn put_stat(&self, name: &str, key: &str, value: f64) {
        log::debug!("diagnostic stat {name}.{key} = {value:.4}");
    }
}
