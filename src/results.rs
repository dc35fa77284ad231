use base64::Engine;
use bytes::Bytes;

use crate::{error::WizardError, models::GenerationResult, prompts::download_file_name};

/// Approved results in approval order, which is always a prefix of the confirmed step order.
#[derive(Debug, Default, Clone)]
pub struct ResultsCollector {
    results: Vec<GenerationResult>,
}

impl ResultsCollector {
    pub fn new() -> Self { Self::default() }

    pub(crate) fn push(&mut self, result: GenerationResult) { self.results.push(result); }

    pub fn len(&self) -> usize { self.results.len() }

    pub fn is_empty(&self) -> bool { self.results.is_empty() }

    /// Image of the most recently approved step, the reference for the next one.
    pub fn last_image(&self) -> Option<&str> {
        self.results.last().map(|r| r.image_base64.as_str())
    }

    pub fn into_vec(self) -> Vec<GenerationResult> { self.results }
}

#[derive(Debug, Clone)]
pub struct PngDownload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Decodes the approved image at `index` into a standalone PNG file.
pub fn export_png(results: &[GenerationResult], index: usize) -> Result<PngDownload, WizardError> {
    let result = results.get(index).ok_or(WizardError::IndexOutOfRange { index, len: results.len() })?;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(result.image_base64.as_bytes())
        .map_err(|e| WizardError::Validation(format!("stored image for step {} is not valid base64: {}", index + 1, e)))?;
    Ok(PngDownload { file_name: download_file_name(index + 1, &result.step.title), bytes: Bytes::from(raw) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessStep, StepStub};
    use chrono::Utc;

    fn result(title: &str, image: &str) -> GenerationResult {
        GenerationResult {
            step: ProcessStep::from_stub(StepStub { title: title.into(), description: String::new() }),
            image_base64: image.into(),
            audio_script: "Narration.".into(),
            approved_at: Utc::now(),
        }
    }

    #[test]
    fn last_image_tracks_latest_approval() {
        let mut collector = ResultsCollector::new();
        assert_eq!(collector.last_image(), None);
        collector.push(result("Intake", "AAAA"));
        collector.push(result("Screening", "BBBB"));
        assert_eq!(collector.last_image(), Some("BBBB"));
        assert_eq!(collector.len(), 2);
    }

    #[test]
    fn png_export_names_file_after_step() {
        let results = vec![result("Intake", "aGVsbG8="), result("Primary Settling", "iVBORw0KGgo=")];
        let download = export_png(&results, 1).unwrap();
        assert_eq!(download.file_name, "step_2_Primary_Settling.png");
        assert_eq!(&download.bytes[..4], b"\x89PNG");
        assert!(matches!(export_png(&results, 2), Err(WizardError::IndexOutOfRange { index: 2, len: 2 })));
    }
}
