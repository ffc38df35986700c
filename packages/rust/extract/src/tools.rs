//! External extraction tools.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use councilwatch_shared::{CouncilWatchError, Result};
use tokio::process::Command;

const PDFINFO: &str = "pdfinfo";
const PDFTOTEXT: &str = "pdftotext";
const PDFTOPPM: &str = "pdftoppm";
const TESSERACT: &str = "tesseract";

/// Binaries that must be on `PATH` before a document run starts.
pub const REQUIRED_TOOLS: [&str; 4] = [PDFINFO, PDFTOTEXT, PDFTOPPM, TESSERACT];

/// The four extraction capabilities used by the PDF cascade.
///
/// A capability whose tool cannot be spawned returns
/// [`CouncilWatchError::ToolUnavailable`]; a tool that runs and fails returns
/// [`CouncilWatchError::Tool`].
#[async_trait]
pub trait DocumentTools: Send + Sync {
    /// One-time capability check run before a document batch.
    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    /// The document's metadata title, `""` when absent.
    async fn info_title(&self, pdf: &Path) -> Result<String>;

    /// The embedded text layer, `""` for image-only documents.
    async fn text_layer(&self, pdf: &Path) -> Result<String>;

    /// Render every page to an image inside `out_dir`.
    async fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>>;

    /// Recognize the text in one page image.
    async fn ocr(&self, image: &Path) -> Result<String>;
}

/// Verify every tool in [`REQUIRED_TOOLS`] is installed.
pub fn check_toolchain() -> Result<()> {
    check_tools(&REQUIRED_TOOLS)
}

/// Verify every named tool resolves on `PATH`.
pub fn check_tools(tools: &[&str]) -> Result<()> {
    let missing: Vec<&str> = tools
        .iter()
        .copied()
        .filter(|tool| which::which(tool).is_err())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    tracing::error!(
        missing = ?missing,
        "install poppler-utils and tesseract-ocr (apt) or poppler and tesseract (homebrew)"
    );
    Err(CouncilWatchError::ToolUnavailable {
        tool: missing.join(", "),
    })
}

/// [`DocumentTools`] backed by `pdfinfo`, `pdftotext`, `pdftoppm` and `tesseract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PopplerTools;

#[async_trait]
impl DocumentTools for PopplerTools {
    fn check_available(&self) -> Result<()> {
        check_toolchain()
    }

    async fn info_title(&self, pdf: &Path) -> Result<String> {
        let out = run_tool(PDFINFO, [pdf.as_os_str()]).await?;
        Ok(parse_info_title(&String::from_utf8_lossy(&out)))
    }

    async fn text_layer(&self, pdf: &Path) -> Result<String> {
        let out = run_tool(PDFTOTEXT, [pdf.as_os_str(), OsStr::new("-")]).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let prefix = out_dir.join("page");
        run_tool(
            PDFTOPPM,
            [OsStr::new("-png"), pdf.as_os_str(), prefix.as_os_str()],
        )
        .await?;

        let entries =
            std::fs::read_dir(out_dir).map_err(|e| CouncilWatchError::io(out_dir, e))?;
        let mut pages = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| CouncilWatchError::io(out_dir, e))?.path();
            let is_page = path
                .file_name()
                .and_then(OsStr::to_str)
                .is_some_and(|name| name.starts_with("page") && name.ends_with(".png"));
            if is_page {
                pages.push(path);
            }
        }
        Ok(pages)
    }

    async fn ocr(&self, image: &Path) -> Result<String> {
        let out = run_tool(TESSERACT, [image.as_os_str(), OsStr::new("stdout")]).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Run `tool` to completion and return its stdout.
///
/// The child is killed if the returned future is dropped, so an enclosing
/// timeout terminates it.
async fn run_tool<'a>(tool: &str, args: impl IntoIterator<Item = &'a OsStr>) -> Result<Vec<u8>> {
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CouncilWatchError::ToolUnavailable {
                    tool: tool.to_string(),
                }
            } else {
                CouncilWatchError::tool(tool, format!("spawn failed: {e}"))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CouncilWatchError::tool(
            tool,
            format!("{}: {}", output.status, stderr.trim()),
        ));
    }
    Ok(output.stdout)
}

/// Pull the `Title:` field out of `pdfinfo` output.
fn parse_info_title(info: &str) -> String {
    info.lines()
        .find_map(|line| line.strip_prefix("Title:"))
        .map(|title| title.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pdfinfo_title() {
        let info = "Title:          Staff Report - Winter Operations | Halifax.ca\n\
                    Author:         HRM\n\
                    Pages:          4\n";
        assert_eq!(
            parse_info_title(info),
            "Staff Report - Winter Operations | Halifax.ca"
        );
        assert_eq!(parse_info_title("Pages: 1\n"), "");
    }

    #[test]
    fn missing_tool_is_reported() {
        let err = check_tools(&["councilwatch-no-such-tool-a", "councilwatch-no-such-tool-b"])
            .unwrap_err();
        match err {
            CouncilWatchError::ToolUnavailable { tool } => {
                assert_eq!(tool, "councilwatch-no-such-tool-a, councilwatch-no-such-tool-b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_tool_list_passes() {
        assert!(check_tools(&[]).is_ok());
    }

    #[tokio::test]
    async fn spawn_not_found_is_unavailable() {
        let err = run_tool("councilwatch-no-such-tool", [OsStr::new("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, CouncilWatchError::ToolUnavailable { .. }));
    }
}
