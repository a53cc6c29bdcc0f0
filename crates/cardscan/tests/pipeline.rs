//! End-to-end pipeline scenarios over synthetic documents.

use std::collections::BTreeMap;
use std::sync::Arc;

use image::{GrayImage, Luma, Rgb, RgbImage};

use cardscan::{
    ConfigError, CoordinateMap, FormPipeline, MaskParams, PipelineConfig, PipelineParams,
    ProcessingStage, RecognitionFailure, RegionKind, RegionRect, TextRecognizer,
};

fn quick_params() -> PipelineParams {
    // Denoising is calibrated for production scans and dominates runtime on
    // large synthetic fixtures; these scenarios assert composition, not
    // noise robustness.
    PipelineParams {
        mask: MaskParams {
            denoise: false,
            ..MaskParams::default()
        },
        ..PipelineParams::default()
    }
}

fn rect(x: i32, y: i32, width: u32, height: u32) -> RegionRect {
    RegionRect {
        x,
        y,
        width,
        height,
    }
}

fn white_rgb(w: u32, h: u32) -> RgbImage {
    RgbImage::from_pixel(w, h, Rgb([255u8; 3]))
}

fn white_gray(w: u32, h: u32) -> GrayImage {
    GrayImage::from_pixel(w, h, Luma([255u8]))
}

fn fill_rect(img: &mut RgbImage, r: RegionRect, value: u8) {
    for y in r.y..r.y + r.height as i32 {
        for x in r.x..r.x + r.width as i32 {
            img.put_pixel(x as u32, y as u32, Rgb([value; 3]));
        }
    }
}

// A sparse dot texture gives the registration stage features to lock onto.
// Dots are confined to a horizontal band so they cannot bleed into field
// regions and flip emptiness decisions.
fn sprinkle_dots(img: &mut RgbImage, seed: u64, y_min: u32, y_max: u32) {
    let (w, _) = img.dimensions();
    let mut state = seed.max(1);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    for _ in 0..80 {
        let cx = 30 + (next() % (w as u64 - 60)) as i32;
        let cy = y_min as i32 + (next() % (y_max - y_min) as u64) as i32;
        let r = 2 + (next() % 3) as i32;
        let shade = (next() % 80) as u8;
        for oy in -r..=r {
            for ox in -r..=r {
                if ox * ox + oy * oy <= r * r {
                    img.put_pixel((cx + ox) as u32, (cy + oy) as u32, Rgb([shade; 3]));
                }
            }
        }
    }
}

struct FixedRecognizer(&'static str);

impl TextRecognizer for FixedRecognizer {
    fn recognize(&self, _: &RgbImage, _: &str) -> Result<String, RecognitionFailure> {
        Ok(self.0.to_owned())
    }
}

#[test]
fn near_black_rh_d_cell_reads_pos() {
    let template = white_rgb(2416, 1552);
    let rh_d = rect(57, 334, 99, 66);
    let coordinates = CoordinateMap::default().with_region("rh_D", rh_d, RegionKind::PhenotypeCell);

    let pipeline = FormPipeline::from_parts(
        template,
        white_gray(2416, 1552),
        white_gray(2416, 1552),
        coordinates,
        quick_params(),
    );

    let mut input = white_rgb(2416, 1552);
    fill_rect(&mut input, rh_d, 20);

    let result = pipeline.process(&input).expect("process");
    assert_eq!(
        result.phenotype_data.get("rh_D"),
        Some(&Some(vec!["Pos".to_owned()]))
    );
    assert_eq!(result.fields.get("rh_D"), Some(&Some("Pos".to_owned())));
}

#[test]
fn blank_card_yields_all_null_fields() {
    let mut template = white_rgb(640, 420);
    sprinkle_dots(&mut template, 17, 290, 390);
    let alignment_mask = image::imageops::grayscale(&template);

    let coordinates = CoordinateMap::default()
        .with_region("patient_name", rect(300, 60, 200, 50), RegionKind::Text)
        .with_region("rh_D", rect(60, 200, 60, 40), RegionKind::PhenotypeCell)
        .with_region("kell_K", rect(140, 200, 60, 40), RegionKind::PhenotypeCell);

    let pipeline = FormPipeline::from_parts(
        template.clone(),
        alignment_mask,
        white_gray(640, 420),
        coordinates,
        quick_params(),
    )
    .with_recognizer(Arc::new(FixedRecognizer("SHOULD NOT APPEAR")));

    // The input is the template itself: registration must hold, and every
    // field region is blank.
    let result = pipeline.process(&template).expect("process");

    assert_eq!(result.patient_info.name, None);
    assert_eq!(result.patient_info.mrn, None);
    for (name, value) in &result.phenotype_data {
        assert_eq!(value, &None, "phenotype field {name} should be null");
    }
    for (name, value) in &result.fields {
        assert_eq!(value, &None, "field {name} should be null");
    }
}

#[test]
fn text_fields_are_dispatched_to_the_recognizer() {
    let template = white_rgb(500, 400);
    let name_rect = rect(120, 80, 180, 50);
    let mrn_rect = rect(120, 180, 180, 50);
    let coordinates = CoordinateMap::default()
        .with_region("patient_name", name_rect, RegionKind::Text)
        .with_region("fmp_ssn", mrn_rect, RegionKind::Text);

    let pipeline = FormPipeline::from_parts(
        template,
        white_gray(500, 400),
        white_gray(500, 400),
        coordinates,
        quick_params(),
    )
    .with_recognizer(Arc::new(FixedRecognizer("JANE DOE")));

    let mut input = white_rgb(500, 400);
    fill_rect(&mut input, rect(140, 95, 100, 20), 40); // handwriting in the name box
    fill_rect(&mut input, rect(140, 195, 100, 20), 40); // and in the mrn box

    let result = pipeline.process(&input).expect("process");
    assert_eq!(result.patient_info.name.as_deref(), Some("JANE DOE"));
    assert_eq!(result.patient_info.mrn.as_deref(), Some("JANE DOE"));
}

#[test]
fn without_a_recognizer_text_fields_stay_null() {
    let template = white_rgb(500, 400);
    let coordinates =
        CoordinateMap::default().with_region("patient_name", rect(120, 80, 180, 50), RegionKind::Text);

    let pipeline = FormPipeline::from_parts(
        template,
        white_gray(500, 400),
        white_gray(500, 400),
        coordinates,
        quick_params(),
    );

    let mut input = white_rgb(500, 400);
    fill_rect(&mut input, rect(140, 95, 100, 20), 40);

    let result = pipeline.process(&input).expect("process");
    assert_eq!(result.patient_info.name, None);
}

#[test]
fn process_is_idempotent() {
    let mut template = white_rgb(600, 400);
    sprinkle_dots(&mut template, 41, 290, 380);
    let alignment_mask = image::imageops::grayscale(&template);

    let coordinates = CoordinateMap::default()
        .with_region("patient_name", rect(300, 60, 200, 50), RegionKind::Text)
        .with_region("rh_D", rect(60, 200, 80, 50), RegionKind::PhenotypeCell);

    let pipeline = FormPipeline::from_parts(
        template.clone(),
        alignment_mask,
        white_gray(600, 400),
        coordinates,
        quick_params(),
    )
    .with_recognizer(Arc::new(FixedRecognizer("A POSITIVE")));

    let mut input = template.clone();
    fill_rect(&mut input, rect(320, 75, 120, 20), 30); // patient name ink
    fill_rect(&mut input, rect(60, 200, 80, 50), 200); // moderate mark

    let first = pipeline.process(&input).expect("first run");
    let second = pipeline.process(&input).expect("second run");
    assert_eq!(first, second);

    assert_eq!(first.patient_info.name.as_deref(), Some("A POSITIVE"));
    assert_eq!(
        first.phenotype_data.get("rh_D"),
        Some(&Some(vec!["+".to_owned()]))
    );
}

#[test]
fn offscreen_regions_resolve_to_null() {
    let template = white_rgb(400, 300);
    let coordinates = CoordinateMap::default()
        .with_region("offscreen", rect(900, 900, 50, 50), RegionKind::Text)
        .with_region("rh_D", rect(60, 60, 60, 40), RegionKind::PhenotypeCell);

    let pipeline = FormPipeline::from_parts(
        template,
        white_gray(400, 300),
        white_gray(400, 300),
        coordinates,
        quick_params(),
    );

    let result = pipeline.process(&white_rgb(400, 300)).expect("process");
    assert_eq!(result.fields.get("offscreen"), Some(&None));
    assert_eq!(result.phenotype_data.get("rh_D"), Some(&None));
}

#[test]
fn batch_reports_partial_success() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut scan = white_rgb(400, 300);
    fill_rect(&mut scan, rect(60, 60, 60, 40), 20);
    let good = dir.path().join("scan.png");
    scan.save(&good).expect("save scan");

    let bogus = dir.path().join("missing.png");

    let coordinates =
        CoordinateMap::default().with_region("rh_D", rect(60, 60, 60, 40), RegionKind::PhenotypeCell);
    let pipeline = FormPipeline::from_parts(
        white_rgb(400, 300),
        white_gray(400, 300),
        white_gray(400, 300),
        coordinates,
        quick_params(),
    );

    let report = pipeline.process_batch(&[good, bogus]);
    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.failures, 1);

    let ok = report.documents[0].result.as_ref().expect("first document");
    assert_eq!(
        ok.phenotype_data.get("rh_D"),
        Some(&Some(vec!["Pos".to_owned()]))
    );

    let err = report.documents[1].result.as_ref().unwrap_err();
    assert_eq!(err.stage, ProcessingStage::Load);
}

#[test]
fn construction_requires_every_asset() {
    let dir = tempfile::tempdir().expect("tempdir");

    let template = dir.path().join("template.png");
    white_rgb(60, 40).save(&template).expect("save template");
    let mask = dir.path().join("mask.png");
    white_gray(60, 40).save(&mask).expect("save mask");
    let coords = dir.path().join("coords.json");
    std::fs::write(
        &coords,
        r#"{"regions": {"rh_D": {"x": 5, "y": 5, "width": 20, "height": 10, "kind": "phenotype_cell"}}}"#,
    )
    .expect("write coords");

    let mut config = PipelineConfig {
        template_path: template.clone(),
        alignment_mask_path: mask.clone(),
        manual_mask_path: mask.clone(),
        coordinates_path: coords,
        params: quick_params(),
    };
    assert!(FormPipeline::new(&config).is_ok());

    config.coordinates_path = dir.path().join("absent.json");
    assert!(matches!(
        FormPipeline::new(&config).unwrap_err(),
        ConfigError::CoordinatesMissing { .. }
    ));

    config.coordinates_path = dir.path().join("coords.json");
    config.template_path = dir.path().join("absent.png");
    assert!(matches!(
        FormPipeline::new(&config).unwrap_err(),
        ConfigError::Template { .. }
    ));
}

#[test]
fn shared_pipeline_processes_documents_concurrently() {
    let template = white_rgb(300, 200);
    let coordinates =
        CoordinateMap::default().with_region("rh_D", rect(40, 40, 60, 40), RegionKind::PhenotypeCell);
    let pipeline = Arc::new(FormPipeline::from_parts(
        template,
        white_gray(300, 200),
        white_gray(300, 200),
        coordinates,
        quick_params(),
    ));

    let mut marked = white_rgb(300, 200);
    fill_rect(&mut marked, rect(40, 40, 60, 40), 100);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            let doc = if i % 2 == 0 {
                marked.clone()
            } else {
                white_rgb(300, 200)
            };
            std::thread::spawn(move || pipeline.process(&doc).expect("process"))
        })
        .collect();

    let mut results: Vec<BTreeMap<String, Option<Vec<String>>>> = handles
        .into_iter()
        .map(|h| h.join().expect("join").phenotype_data)
        .collect();
    results.sort();

    assert_eq!(results[0].get("rh_D"), Some(&None));
    assert_eq!(
        results[3].get("rh_D"),
        Some(&Some(vec!["Pos".to_owned()]))
    );
}
