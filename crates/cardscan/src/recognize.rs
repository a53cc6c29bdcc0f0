//! Text-recognition boundary.
//!
//! The handwriting model is an external collaborator behind one trait. The
//! pipeline treats it as a synchronous request/response call that may be
//! slow, so each dispatch runs on a helper thread bounded by a timeout and
//! is retried at most once on transient failure. A field whose recognition
//! ultimately fails is recorded as unrecognized, never as a document error.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::RecognitionFailure;

/// The opaque handwriting-recognition collaborator.
///
/// `field_hint` names the region being recognized so backends can apply
/// field-specific decoding (the pipeline itself attaches no meaning to it).
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &RgbImage, field_hint: &str) -> Result<String, RecognitionFailure>;
}

/// Timeout and retry policy for recognition dispatches.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionPolicy {
    pub timeout_ms: u64,
    /// Additional attempts after the first failure.
    pub retries: u32,
}

impl Default for RecognitionPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 1,
        }
    }
}

impl RecognitionPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// The collaborator call is an uninterruptible black box; run it on its own
// thread and give up waiting at the timeout. An abandoned thread finishes on
// its own and its late reply is dropped with the channel.
fn recognize_once(
    recognizer: &Arc<dyn TextRecognizer>,
    image: &RgbImage,
    field_hint: &str,
    timeout: Duration,
) -> Result<String, RecognitionFailure> {
    let (tx, rx) = mpsc::channel();
    let recognizer = Arc::clone(recognizer);
    let image = image.clone();
    let hint = field_hint.to_owned();

    std::thread::spawn(move || {
        let _ = tx.send(recognizer.recognize(&image, &hint));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(RecognitionFailure::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(RecognitionFailure::Disconnected),
    }
}

/// Dispatch one region to the recognizer under the given policy.
pub fn recognize_with_policy(
    recognizer: &Arc<dyn TextRecognizer>,
    image: &RgbImage,
    field_hint: &str,
    policy: &RecognitionPolicy,
) -> Result<String, RecognitionFailure> {
    let attempts = policy.retries.saturating_add(1);
    let mut last = RecognitionFailure::Disconnected;
    for attempt in 1..=attempts {
        match recognize_once(recognizer, image, field_hint, policy.timeout()) {
            Ok(text) => return Ok(text),
            Err(err) => {
                log::warn!("recognition attempt {attempt}/{attempts} for {field_hint} failed: {err}");
                last = err;
            }
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use image::Rgb;

    struct Fixed(&'static str);

    impl TextRecognizer for Fixed {
        fn recognize(&self, _: &RgbImage, _: &str) -> Result<String, RecognitionFailure> {
            Ok(self.0.to_owned())
        }
    }

    struct FailsThenSucceeds {
        calls: AtomicUsize,
    }

    impl TextRecognizer for FailsThenSucceeds {
        fn recognize(&self, _: &RgbImage, _: &str) -> Result<String, RecognitionFailure> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RecognitionFailure::Backend("transient".to_owned()))
            } else {
                Ok("recovered".to_owned())
            }
        }
    }

    struct Slow;

    impl TextRecognizer for Slow {
        fn recognize(&self, _: &RgbImage, _: &str) -> Result<String, RecognitionFailure> {
            std::thread::sleep(Duration::from_millis(200));
            Ok("too late".to_owned())
        }
    }

    fn probe() -> RgbImage {
        RgbImage::from_pixel(8, 8, Rgb([255u8; 3]))
    }

    #[test]
    fn successful_recognition_passes_through() {
        let rec: Arc<dyn TextRecognizer> = Arc::new(Fixed("JANE DOE"));
        let text =
            recognize_with_policy(&rec, &probe(), "patient_name", &RecognitionPolicy::default())
                .expect("recognized");
        assert_eq!(text, "JANE DOE");
    }

    #[test]
    fn transient_failure_is_retried_once() {
        let rec: Arc<dyn TextRecognizer> = Arc::new(FailsThenSucceeds {
            calls: AtomicUsize::new(0),
        });
        let text =
            recognize_with_policy(&rec, &probe(), "fmp_ssn", &RecognitionPolicy::default())
                .expect("second attempt succeeds");
        assert_eq!(text, "recovered");
    }

    #[test]
    fn persistent_failure_surfaces_after_retries() {
        struct AlwaysFails;
        impl TextRecognizer for AlwaysFails {
            fn recognize(&self, _: &RgbImage, _: &str) -> Result<String, RecognitionFailure> {
                Err(RecognitionFailure::Backend("down".to_owned()))
            }
        }
        let rec: Arc<dyn TextRecognizer> = Arc::new(AlwaysFails);
        let err = recognize_with_policy(&rec, &probe(), "field", &RecognitionPolicy::default())
            .unwrap_err();
        assert!(matches!(err, RecognitionFailure::Backend(_)));
    }

    #[test]
    fn slow_recognizer_times_out() {
        let rec: Arc<dyn TextRecognizer> = Arc::new(Slow);
        let policy = RecognitionPolicy {
            timeout_ms: 20,
            retries: 0,
        };
        let err = recognize_with_policy(&rec, &probe(), "field", &policy).unwrap_err();
        assert!(matches!(err, RecognitionFailure::Timeout(_)));
    }
}
