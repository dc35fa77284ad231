use crate::{error::WizardError, models::{GenerationResult, RunSettings}};
use printpdf::*;
use std::io::BufWriter;

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const LINE_CHARS: usize = 95;
const MARGIN_X: f32 = 15.0;
const TOP_Y: f32 = 262.0;
/// Body text stops here; the approval footer sits below.
const BOTTOM_Y: f32 = 25.0;

/// Writes lines top to bottom, continuing on a fresh page when the current one is full.
struct PageCursor<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    heading: String,
    y: f32,
    pages: usize,
}

impl<'a> PageCursor<'a> {
    fn new(doc: &'a PdfDocumentReference, layer: PdfLayerReference, heading: String) -> Self {
        Self { doc, layer, heading, y: TOP_Y, pages: 1 }
    }

    fn line(&mut self, text: impl Into<String>, size: f32, advance: f32, font: &IndirectFontRef) {
        if self.y < BOTTOM_Y {
            let (page, layer) = self.doc.add_page(Mm(PAGE_W), Mm(PAGE_H), format!("{} (cont.)", self.heading));
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP_Y;
            self.pages += 1;
        }
        self.layer.use_text(text, size, Mm(MARGIN_X), Mm(self.y), font);
        self.y -= advance;
    }

    fn skip(&mut self, gap: f32) {
        self.y -= gap;
    }
}

/// Text-only storyboard of an approved run. Images are exported separately as PNG.
pub fn generate_pdf(settings: &RunSettings, results: &[GenerationResult]) -> Result<Vec<u8>, WizardError> {
    render(settings, results).map(|(bytes, _)| bytes)
}

/// Renders the document and reports how many pages it took.
fn render(settings: &RunSettings, results: &[GenerationResult]) -> Result<(Vec<u8>, usize), WizardError> {
    let (doc, cover, layer) = PdfDocument::new(
        format!("Process: {}", truncate(&settings.project_title, 48)),
        Mm(PAGE_W),
        Mm(PAGE_H),
        "Layer 1",
    );
    let font = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_err)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_err)?;

    let summary = doc.get_page(cover).get_layer(layer);
    summary.use_text(truncate(&settings.project_title, 60), 20.0, Mm(MARGIN_X), Mm(275.0), &bold);
    let mut cursor = PageCursor::new(&doc, summary, truncate(&settings.project_title, 40));
    for line in wrap(&settings.project_description, LINE_CHARS) {
        cursor.line(line, 11.0, 6.0, &font);
    }
    cursor.skip(6.0);
    cursor.line(
        format!("{} steps | {} | {}", results.len(), settings.visualization_style.label(), settings.complexity.step_range_label()),
        10.0,
        6.0,
        &font,
    );
    let mut pages = cursor.pages;

    for (i, result) in results.iter().enumerate() {
        let heading = format!("Step {}: {}", i + 1, result.step.title);
        let (page, layer) = doc.add_page(Mm(PAGE_W), Mm(PAGE_H), truncate(&heading, 40));
        let layer_ref = doc.get_page(page).get_layer(layer);
        layer_ref.use_text(truncate(&heading, 70), 16.0, Mm(MARGIN_X), Mm(275.0), &bold);

        let mut cursor = PageCursor::new(&doc, layer_ref, truncate(&heading, 40));
        for line in wrap(&result.step.description, LINE_CHARS) {
            cursor.line(line, 10.0, 5.5, &font);
        }
        cursor.skip(6.0);
        cursor.line("Narration Script", 12.0, 7.0, &bold);
        for line in wrap(&result.audio_script, LINE_CHARS) {
            cursor.line(line, 10.0, 5.5, &font);
        }
        cursor.layer.use_text(
            format!("Approved {}", result.approved_at.format("%Y-%m-%d %H:%M UTC")),
            8.0,
            Mm(MARGIN_X),
            Mm(15.0),
            &font,
        );
        pages += cursor.pages;
    }

    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut buf);
        doc.save(&mut writer).map_err(pdf_err)?;
    }
    Ok((buf, pages))
}

fn pdf_err(e: impl std::fmt::Display) -> WizardError {
    WizardError::Export(format!("could not render PDF: {}", e))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s.to_string(),
    }
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}
