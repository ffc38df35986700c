//! Text extraction for fetched external documents.
//!
//! - [`DocumentTools`] — the four extraction capabilities (metadata title,
//!   text layer, page rasterization, OCR)
//! - [`PopplerTools`] — implementation backed by poppler-utils and tesseract
//! - [`extract_pdf`] — the text-layer first, OCR fallback cascade

mod pdf;
mod tools;

pub use pdf::{clean_title, extract_pdf};
pub use tools::{DocumentTools, PopplerTools, REQUIRED_TOOLS, check_toolchain, check_tools};
