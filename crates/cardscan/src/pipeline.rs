//! Pipeline orchestration.
//!
//! One document flows through registration and masking once, then every
//! region in the coordinate map is extracted, classified and (for text
//! fields) dispatched to the recognizer. Regions are independent pure
//! functions over the masked image, so they fan out across worker threads
//! and fold back into a name-keyed result with no ordering requirement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use rayon::prelude::*;

use cardscan_core::DiagnosticsSink;

use crate::align::AlignmentEngine;
use crate::classify::FieldClassifier;
use crate::config::{CoordinateMap, PipelineConfig, PipelineParams, RegionKind};
use crate::error::{ConfigError, PipelineError, ProcessingStage};
use crate::extract::{ExtractedRegion, RegionExtractor};
use crate::mask::{binarize, MaskEngine};
use crate::outcome::{FieldOutcome, FormResult};
use crate::recognize::{recognize_with_policy, RecognitionPolicy, TextRecognizer};

/// The document-processing pipeline.
///
/// All state is loaded at construction and immutable afterwards, so one
/// pipeline instance can process documents from multiple threads.
pub struct FormPipeline {
    aligner: AlignmentEngine,
    masker: MaskEngine,
    extractor: RegionExtractor,
    classifier: FieldClassifier,
    coordinates: CoordinateMap,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    recognition: RecognitionPolicy,
}

impl std::fmt::Debug for FormPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormPipeline")
            .field("coordinates", &self.coordinates)
            .field("recognition", &self.recognition)
            .field("has_recognizer", &self.recognizer.is_some())
            .finish_non_exhaustive()
    }
}

impl FormPipeline {
    /// Load template, masks and coordinate map from disk.
    ///
    /// Each missing or unreadable input is a distinct fatal error; there is
    /// no degraded mode without the reference assets.
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let template = image::open(&config.template_path)
            .map_err(|source| ConfigError::Template {
                path: config.template_path.clone(),
                source,
            })?
            .to_rgb8();
        let alignment_mask = image::open(&config.alignment_mask_path)
            .map_err(|source| ConfigError::AlignmentMask {
                path: config.alignment_mask_path.clone(),
                source,
            })?
            .to_luma8();
        let manual_mask = image::open(&config.manual_mask_path)
            .map_err(|source| ConfigError::ManualMask {
                path: config.manual_mask_path.clone(),
                source,
            })?
            .to_luma8();
        let coordinates = CoordinateMap::load(&config.coordinates_path)?;

        log::info!(
            "pipeline configured: template {}x{}, {} regions",
            template.width(),
            template.height(),
            coordinates.len()
        );

        Ok(Self::from_parts(
            template,
            alignment_mask,
            manual_mask,
            coordinates,
            config.params.clone(),
        ))
    }

    /// Build a pipeline from in-memory assets. Masks are binarized here, so
    /// callers may pass plain grayscale images.
    pub fn from_parts(
        template: RgbImage,
        alignment_mask: image::GrayImage,
        manual_mask: image::GrayImage,
        coordinates: CoordinateMap,
        params: PipelineParams,
    ) -> Self {
        let template_size = template.dimensions();
        let aligner = AlignmentEngine::new(
            binarize(&alignment_mask, 127),
            template_size,
            params.alignment,
        );

        let stat_rects = params
            .mask
            .stat_regions
            .iter()
            .filter_map(|name| coordinates.get(name).map(|spec| (name.clone(), spec.rect)))
            .collect();
        let masker = MaskEngine::new(manual_mask, params.mask.clone()).with_stat_rects(stat_rects);

        let extractor = RegionExtractor::new(coordinates.clone());
        let classifier = FieldClassifier::new(params.classifier.clone());

        Self {
            aligner,
            masker,
            extractor,
            classifier,
            coordinates,
            recognizer: None,
            recognition: params.recognition,
        }
    }

    /// Attach the external text-recognition collaborator. Without one,
    /// non-empty text fields stay unrecognized (null).
    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Attach a diagnostics sink. Artifacts are fire-and-forget and the
    /// sink never influences results.
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.aligner = self.aligner.with_sink(sink.clone());
        self.masker = self.masker.with_sink(sink.clone());
        self.classifier = self.classifier.with_sink(sink);
        self
    }

    /// Process a document from disk.
    pub fn process_path(&self, path: &Path) -> Result<FormResult, PipelineError> {
        let image = image::open(path)
            .map_err(|err| {
                PipelineError::new(
                    ProcessingStage::Load,
                    format!("cannot decode {}: {err}", path.display()),
                )
            })?
            .to_rgb8();
        self.process(&image)
    }

    /// Process one decoded document.
    pub fn process(&self, image: &RgbImage) -> Result<FormResult, PipelineError> {
        let aligned = self.aligner.align(image);
        let masked = self.masker.apply(&aligned.image);

        let regions: Vec<(&String, RegionKind)> = self
            .coordinates
            .regions
            .iter()
            .map(|(name, spec)| (name, spec.kind))
            .collect();

        let values: BTreeMap<String, Option<String>> = regions
            .par_iter()
            .map(|&(name, kind)| (name.clone(), self.resolve_region(&masked, name, kind)))
            .collect();

        Ok(FormResult::assemble(values, &self.coordinates))
    }

    /// Process a batch of documents, reporting per-document results and a
    /// running failure total. A failed document never aborts the batch.
    pub fn process_batch(&self, paths: &[PathBuf]) -> BatchReport {
        let mut documents = Vec::with_capacity(paths.len());
        let mut failures = 0usize;
        for path in paths {
            let result = self.process_path(path);
            if let Err(err) = &result {
                failures += 1;
                log::warn!("document {} failed: {err}", path.display());
            }
            documents.push(DocumentReport {
                path: path.clone(),
                result,
            });
        }
        log::info!(
            "batch finished: {}/{} documents succeeded",
            documents.len() - failures,
            documents.len()
        );
        BatchReport {
            documents,
            failures,
        }
    }

    fn resolve_region(&self, masked: &RgbImage, name: &str, kind: RegionKind) -> Option<String> {
        let region = match self.extractor.extract(masked, name) {
            Ok(region) => region,
            Err(err) => {
                log::warn!("skipping region {name}: {err}");
                return None;
            }
        };
        let outcome = self.classify_region(&region, kind);
        self.resolve_outcome(name, outcome)
    }

    fn classify_region(&self, region: &ExtractedRegion, kind: RegionKind) -> FieldOutcome {
        let gray = image::imageops::grayscale(&region.image);
        match kind {
            RegionKind::PhenotypeCell => match self.classifier.classify_mark(&gray, &region.name) {
                Some(mark) => FieldOutcome::Mark(mark),
                None => FieldOutcome::Empty,
            },
            RegionKind::Text => {
                if self.classifier.is_empty(&gray, &region.name) {
                    FieldOutcome::Empty
                } else {
                    FieldOutcome::Recognizable(region.image.clone())
                }
            }
        }
    }

    fn resolve_outcome(&self, name: &str, outcome: FieldOutcome) -> Option<String> {
        match outcome {
            FieldOutcome::Empty => None,
            FieldOutcome::Mark(mark) => Some(mark.as_str().to_owned()),
            FieldOutcome::Recognizable(pixels) => {
                let Some(recognizer) = &self.recognizer else {
                    log::debug!("no recognizer configured; {name} stays unrecognized");
                    return None;
                };
                match recognize_with_policy(recognizer, &pixels, name, &self.recognition) {
                    Ok(text) => Some(text),
                    Err(err) => {
                        log::warn!("recognition failed for {name}: {err}");
                        None
                    }
                }
            }
        }
    }
}

/// One document's result within a batch.
#[derive(Debug)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub result: Result<FormResult, PipelineError>,
}

/// Batch outcome with partial-success accounting.
#[derive(Debug)]
pub struct BatchReport {
    pub documents: Vec<DocumentReport>,
    /// Number of documents that failed with a [`PipelineError`].
    pub failures: usize,
}
