//! Local content extraction: plain text directly, PDF and OCR behind features.

use providers::{ContentExtractor, Extraction, ProviderError};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Characters of extracted text kept for classification.
pub const SNIPPET_CHARS: usize = 500;
const MAX_TEXT_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    /// Types whose text can be pulled out and outranks the filename.
    Document,
    Other,
}

impl FileKind {
    pub fn of(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "heic" | "tif" | "tiff" => {
                FileKind::Image
            }
            "pdf" => FileKind::Document,
            e if is_plain_text_ext(e) => FileKind::Document,
            "" => Self::sniff(path),
            _ => FileKind::Other,
        }
    }

    /// Magic-byte detection for files without an extension.
    fn sniff(path: &Path) -> Self {
        match infer::get_from_path(path) {
            Ok(Some(kind)) if kind.mime_type().starts_with("image/") => FileKind::Image,
            Ok(Some(kind)) if kind.mime_type() == "application/pdf" => FileKind::Document,
            _ => FileKind::Other,
        }
    }
}

fn is_plain_text_ext(ext: &str) -> bool {
    matches!(
        ext,
        "txt" | "md" | "markdown" | "csv" | "log" | "json" | "tex" | "rst" | "yaml" | "yml" | "toml"
    )
}

#[derive(Debug, Clone)]
pub struct LocalExtractor {
    min_chars: usize,
}

impl LocalExtractor {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    fn judge(&self, raw: &str) -> Extraction {
        let text = clean(raw);
        let meaningful = text.chars().filter(|c| c.is_alphanumeric()).count();
        if meaningful >= self.min_chars {
            Extraction::Text(text)
        } else {
            Extraction::Insufficient
        }
    }
}

/// Collapse whitespace and keep the first [`SNIPPET_CHARS`] characters.
pub fn clean(raw: &str) -> String {
    raw.chars()
        .take(SNIPPET_CHARS)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn read_text_prefix(path: &Path) -> std::io::Result<String> {
    let file = fs::File::open(path)?;
    let mut buf = Vec::new();
    file.take(MAX_TEXT_BYTES).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn extract_blocking(path: &Path) -> Result<Option<String>, ProviderError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if is_plain_text_ext(&ext) {
        return Ok(Some(read_text_prefix(path)?));
    }
    match FileKind::of(path) {
        FileKind::Document => pdf_text(path),
        FileKind::Image => ocr_text(path),
        FileKind::Other => Ok(None),
    }
}

#[cfg(feature = "pdf")]
fn pdf_text(path: &Path) -> Result<Option<String>, ProviderError> {
    let bytes = fs::read(path)?;
    pdf_extract::extract_text_from_mem(&bytes)
        .map(Some)
        .map_err(|e| ProviderError::RequestFailed(format!("pdf extraction: {}", e)))
}

#[cfg(not(feature = "pdf"))]
fn pdf_text(_path: &Path) -> Result<Option<String>, ProviderError> {
    Ok(None)
}

#[cfg(feature = "ocr")]
fn ocr_text(path: &Path) -> Result<Option<String>, ProviderError> {
    let mut lt = leptess::LepTess::new(None, "eng")
        .map_err(|e| ProviderError::Unavailable(format!("tesseract: {}", e)))?;
    lt.set_image(path)
        .map_err(|e| ProviderError::RequestFailed(format!("ocr load: {}", e)))?;
    lt.get_utf8_text()
        .map(Some)
        .map_err(|e| ProviderError::RequestFailed(format!("ocr: {}", e)))
}

#[cfg(not(feature = "ocr"))]
fn ocr_text(_path: &Path) -> Result<Option<String>, ProviderError> {
    Ok(None)
}

#[async_trait::async_trait]
impl ContentExtractor for LocalExtractor {
    async fn extract_text(&self, path: &Path) -> Result<Extraction, ProviderError> {
        let owned: PathBuf = path.to_path_buf();
        let raw = tokio::task::spawn_blocking(move || extract_blocking(&owned))
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))??;
        match raw {
            Some(text) => Ok(self.judge(&text)),
            None => {
                debug!(path = %path.display(), "no extractor for file type");
                Ok(Extraction::Insufficient)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_by_extension() {
        assert_eq!(FileKind::of(Path::new("a/Screenshot 1.PNG")), FileKind::Image);
        assert_eq!(FileKind::of(Path::new("PS2.pdf")), FileKind::Document);
        assert_eq!(FileKind::of(Path::new("notes.md")), FileKind::Document);
        assert_eq!(FileKind::of(Path::new("setup.exe")), FileKind::Other);
    }

    #[test]
    fn sniffs_extensionless_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noext");
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        fs::write(&path, png_magic).unwrap();
        assert_eq!(FileKind::of(&path), FileKind::Image);
    }

    #[test]
    fn clean_collapses_and_truncates() {
        assert_eq!(clean("  a \n\n b\tc "), "a b c");
        let long = "x".repeat(2000);
        assert_eq!(clean(&long).len(), SNIPPET_CHARS);
    }

    #[tokio::test]
    async fn plain_text_sufficiency() {
        let dir = tempfile::tempdir().unwrap();
        let rich = dir.path().join("notes.txt");
        fs::write(&rich, "Integration by parts and the fundamental theorem of calculus").unwrap();
        let thin = dir.path().join("thin.txt");
        fs::write(&thin, "  ok  ").unwrap();

        let ex = LocalExtractor::new(20);
        match ex.extract_text(&rich).await.unwrap() {
            Extraction::Text(t) => assert!(t.starts_with("Integration by parts")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ex.extract_text(&thin).await.unwrap(), Extraction::Insufficient);
    }

    #[tokio::test]
    async fn unknown_types_are_insufficient() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tool.exe");
        fs::write(&bin, [0u8, 1, 2, 3]).unwrap();
        let ex = LocalExtractor::new(1);
        assert_eq!(ex.extract_text(&bin).await.unwrap(), Extraction::Insufficient);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let ex = LocalExtractor::new(1);
        assert!(ex.extract_text(Path::new("/definitely/not/here.txt")).await.is_err());
    }
}
