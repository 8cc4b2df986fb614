//! Page rendering through poppler-utils and LibreOffice.

use crate::backends::executor::CommandExecutor;
use crate::backends::{BackendError, PageRenderer};
use crate::models::{ArtifactKind, RenderedPage, UnitImage};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PAGE_PREFIX: &str = "page";

pub struct CommandRenderer {
    executor: CommandExecutor,
    dpi: u32,
    temp_dir: Option<PathBuf>,
}

impl CommandRenderer {
    pub fn new(timeout: Duration, dpi: u32, temp_dir: Option<PathBuf>) -> Self {
        Self {
            executor: CommandExecutor::new(timeout),
            dpi,
            temp_dir,
        }
    }

    fn workspace(&self) -> Result<tempfile::TempDir, BackendError> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("render-");
            builder
        };
        let dir = match &self.temp_dir {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        };
        dir.map_err(|e| BackendError::Unavailable(format!("Failed to create work dir: {}", e)))
    }

    async fn to_pdf(
        &self,
        document: &[u8],
        kind: ArtifactKind,
        dir: &Path,
    ) -> Result<PathBuf, BackendError> {
        let source = dir.join(format!("source.{}", source_extension(document, kind)));
        tokio::fs::write(&source, document)
            .await
            .map_err(|e| BackendError::Unavailable(format!("Failed to write source: {}", e)))?;

        if kind == ArtifactKind::Pdf {
            return Ok(source);
        }

        let outdir = path_arg(dir)?;
        let input = path_arg(&source)?;
        self.executor
            .execute(
                "soffice",
                &["--headless", "--convert-to", "pdf", "--outdir", outdir, input],
                Some(dir),
            )
            .await?;

        let converted = dir.join("source.pdf");
        if !converted.exists() {
            return Err(BackendError::InvalidInput(
                "Presentation could not be converted to PDF".to_string(),
            ));
        }
        Ok(converted)
    }
}

#[async_trait]
impl PageRenderer for CommandRenderer {
    fn name(&self) -> &str {
        "poppler"
    }

    async fn render(
        &self,
        document: &[u8],
        kind: ArtifactKind,
    ) -> Result<Vec<RenderedPage>, BackendError> {
        if !kind.is_paged() {
            return Err(BackendError::InvalidInput(format!(
                "{} artifacts have no pages to render",
                kind
            )));
        }

        let workspace = self.workspace()?;
        let dir = workspace.path();
        let pdf = self.to_pdf(document, kind, dir).await?;
        let pdf_arg = path_arg(&pdf)?;

        let info = self.executor.execute("pdfinfo", &[pdf_arg], None).await?;
        let page_count = parse_page_count(&info.stdout)?;

        let dpi = self.dpi.to_string();
        let prefix = dir.join(PAGE_PREFIX);
        self.executor
            .execute("pdftoppm", &["-png", "-r", dpi.as_str(), pdf_arg, path_arg(&prefix)?], None)
            .await?;

        let text = self
            .executor
            .execute("pdftotext", &["-layout", "-enc", "UTF-8", pdf_arg, "-"], None)
            .await?;
        let mut texts = split_page_text(&String::from_utf8_lossy(&text.stdout)).into_iter();

        let images = collect_page_images(dir).await?;
        if images.len() != page_count {
            return Err(BackendError::InvalidInput(format!(
                "Rendered {} images for {} pages",
                images.len(),
                page_count
            )));
        }

        let mut pages = Vec::with_capacity(page_count);
        for path in images {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| BackendError::Unavailable(format!("Failed to read page: {}", e)))?;
            pages.push(RenderedPage {
                image: UnitImage::new(bytes, "image/png"),
                text: texts.next().flatten(),
            });
        }

        tracing::info!(kind = %kind, page_count, "Document rendered");
        Ok(pages)
    }
}

/// Zero-padded page numbers make lexical order equal page order.
async fn collect_page_images(dir: &Path) -> Result<Vec<PathBuf>, BackendError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| BackendError::Unavailable(format!("Failed to list pages: {}", e)))?;

    let mut images = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| BackendError::Unavailable(format!("Failed to list pages: {}", e)))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(PAGE_PREFIX) && name.ends_with(".png") {
            images.push(entry.path());
        }
    }
    images.sort();
    Ok(images)
}

fn path_arg(path: &Path) -> Result<&str, BackendError> {
    path.to_str()
        .ok_or_else(|| BackendError::Unavailable(format!("Non UTF-8 path: {}", path.display())))
}

/// Legacy `.ppt` files are OLE containers; `.pptx` files are zip archives.
fn source_extension(document: &[u8], kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Pdf => "pdf",
        ArtifactKind::Slideshow if document.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) => "ppt",
        ArtifactKind::Slideshow => "pptx",
        ArtifactKind::Image => "bin",
    }
}

fn parse_page_count(output: &[u8]) -> Result<usize, BackendError> {
    let output_str = String::from_utf8_lossy(output);

    for line in output_str.lines() {
        if let Some(rest) = line.strip_prefix("Pages:") {
            return rest.trim().parse::<usize>().map_err(|e| {
                BackendError::InvalidInput(format!("Failed to parse page count: {}", e))
            });
        }
    }

    Err(BackendError::InvalidInput(
        "Page count not found in pdfinfo output".to_string(),
    ))
}

/// `pdftotext` ends every page with a form feed.
fn split_page_text(text: &str) -> Vec<Option<String>> {
    let mut pages: Vec<&str> = text.split('\u{000C}').collect();
    if pages.last().is_some_and(|last| last.trim().is_empty()) {
        pages.pop();
    }
    pages
        .into_iter()
        .map(|page| {
            let page = page.trim();
            (!page.is_empty()).then(|| page.to_string())
        })
        .collect()
}
