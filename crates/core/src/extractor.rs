use crate::error::ExtractionError;
use crate::models::{page_label, PageRecord};
use crate::traits::{AnalyzedDocument, DocumentAnalyzer};
use std::sync::Arc;
use tracing::debug;

pub struct DocumentExtractor {
    analyzer: Arc<dyn DocumentAnalyzer>,
}

impl DocumentExtractor {
    pub fn new(analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        Self { analyzer }
    }

    pub async fn extract(&self, document: &[u8]) -> Result<Vec<PageRecord>, ExtractionError> {
        let analyzed = self.analyzer.analyze(document).await?;
        let pages = pages_from_analysis(&analyzed)?;
        debug!(page_count = pages.len(), "document analysis converted to pages");
        Ok(pages)
    }
}

pub fn pages_from_analysis(analyzed: &AnalyzedDocument) -> Result<Vec<PageRecord>, ExtractionError> {
    let mut previous = 0u32;
    let mut pages = Vec::with_capacity(analyzed.pages.len());

    for page in &analyzed.pages {
        if page.page_number <= previous {
            return Err(ExtractionError::UnrecognizedResult(format!(
                "page number {} follows {}",
                page.page_number, previous
            )));
        }
        previous = page.page_number;

        let mut content = String::new();
        for word in &page.words {
            content.push_str(&word.content);
            content.push(' ');
        }

        pages.push(PageRecord {
            page_number: page_label(page.page_number),
            content,
        });
    }

    Ok(pages)
}
