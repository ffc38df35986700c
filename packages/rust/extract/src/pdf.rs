//! PDF extraction cascade.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use councilwatch_shared::{CouncilWatchError, ExtractedDocument, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::DocumentTools;

/// Extract title and text from the PDF at `pdf`.
///
/// The text layer is used when it holds any non-whitespace text. Otherwise
/// every page is rasterized into a scoped temporary directory and OCR'd, and
/// the page texts are joined in page order. The whole cascade runs under
/// `timeout`; the temporary directory and any running tool are cleaned up on
/// every exit path.
pub async fn extract_pdf(
    tools: &dyn DocumentTools,
    pdf: &Path,
    timeout: Duration,
    title_suffix: &str,
) -> Result<ExtractedDocument> {
    match tokio::time::timeout(timeout, cascade(tools, pdf, title_suffix)).await {
        Ok(result) => result,
        Err(_) => Err(CouncilWatchError::Timeout {
            stage: "pdf extraction".into(),
            secs: timeout.as_secs(),
        }),
    }
}

async fn cascade(
    tools: &dyn DocumentTools,
    pdf: &Path,
    title_suffix: &str,
) -> Result<ExtractedDocument> {
    let title = degrade(tools.info_title(pdf).await)?;
    let title = clean_title(&title, title_suffix);

    let text = degrade(tools.text_layer(pdf).await)?;
    if !text.trim().is_empty() {
        debug!(pdf = %pdf.display(), chars = text.len(), "text layer found");
        return Ok(ExtractedDocument { title, text });
    }

    let workdir = tempfile::Builder::new()
        .prefix("councilwatch-ocr")
        .tempdir()
        .map_err(|e| CouncilWatchError::io(std::env::temp_dir(), e))?;

    let mut pages = degrade(tools.rasterize(pdf, workdir.path()).await)?;
    pages.sort_by_key(|p| page_number(p));
    debug!(pdf = %pdf.display(), pages = pages.len(), "no text layer, running OCR");

    let mut texts = Vec::with_capacity(pages.len());
    for page in &pages {
        texts.push(degrade(tools.ocr(page).await)?);
    }

    Ok(ExtractedDocument {
        title,
        text: texts.join("\n").trim().to_string(),
    })
}

/// A missing tool yields empty output instead of failing the document.
fn degrade<T: Default>(result: Result<T>) -> Result<T> {
    match result {
        Err(CouncilWatchError::ToolUnavailable { tool }) => {
            warn!(%tool, "tool unavailable, continuing with empty output");
            Ok(T::default())
        }
        other => other,
    }
}

/// Strip a trailing site-branding suffix (e.g. `| Halifax.ca`) from a title.
pub fn clean_title(raw: &str, suffix: &str) -> String {
    let title = raw.trim();
    let title = if suffix.is_empty() {
        title
    } else {
        title.strip_suffix(suffix).unwrap_or(title)
    };
    title.trim().to_string()
}

/// Numeric page suffix of a rasterized file (`page-07.png` -> 7).
fn page_number(path: &Path) -> (u32, PathBuf) {
    static PAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d+)\.[A-Za-z]+$").expect("valid regex"));

    let number = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|name| PAGE_RE.captures(name))
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(u32::MAX);
    (number, path.to_path_buf())
}
