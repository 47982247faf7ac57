use crate::error::IngestError;
use crate::traits::DocumentFetcher;
use lopdf::Document;
use std::path::Path;

/// `lopdf`-backed page extractor. Pages with no extractable text stay in
/// the output as empty strings so page numbering survives into chunk ids.
#[derive(Default)]
pub struct LopdfFetcher;

impl DocumentFetcher for LopdfFetcher {
    fn fetch_pages(&self, path: &Path) -> Result<Vec<String>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            pages.push(text);
        }

        if pages.iter().all(|page| page.trim().is_empty()) {
            return Err(IngestError::EmptyDocument(path.display().to_string()));
        }

        Ok(pages)
    }
}
