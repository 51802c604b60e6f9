//! Per-file inspection: type guessing, category classification and text
//! extraction.

use std::{
    fmt,
    io::Read,
    path::Path,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of characters kept by shallow processing.
pub const DEFAULT_SAMPLE_SIZE: usize = 1000;

/// Extensions treated as text even when no `text/*` MIME type is guessed.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "py", "js", "java", "cpp", "c", "h", "json", "xml", "yaml",
    "yml", "csv", "log", "rst", "html", "css", "sh", "bash", "sql", "r", "rb",
];

/// Coarse file category derived from the extension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Document,
    Code,
    Data,
    Image,
    Spreadsheet,
    Presentation,
    Archive,
    Misc,
}

impl FileCategory {
    /// Classify a path by its (case-insensitive) extension.
    ///
    /// ```
    /// use std::path::Path;
    /// use file_concierge::processor::FileCategory;
    ///
    /// assert_eq!(FileCategory::of(Path::new("a.PY")), FileCategory::Code);
    /// assert_eq!(FileCategory::of(Path::new("README")), FileCategory::Misc);
    /// ```
    pub fn of(path: &Path) -> Self {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_ascii_lowercase(),
            None => return Self::Misc,
        };

        match ext.as_str() {
            "pdf" | "doc" | "docx" | "txt" | "md" | "rtf" | "odt" => {
                Self::Document
            }
            "py" | "js" | "java" | "cpp" | "c" | "h" | "go" | "rb" | "php" => {
                Self::Code
            }
            "csv" | "json" | "xml" | "yaml" | "yml" | "sql" => Self::Data,
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "svg" | "webp" => {
                Self::Image
            }
            "xls" | "xlsx" | "ods" => Self::Spreadsheet,
            "ppt" | "pptx" | "odp" => Self::Presentation,
            "zip" | "tar" | "gz" | "rar" | "7z" => Self::Archive,
            _ => Self::Misc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Code => "code",
            Self::Data => "data",
            Self::Image => "image",
            Self::Spreadsheet => "spreadsheet",
            Self::Presentation => "presentation",
            Self::Archive => "archive",
            Self::Misc => "misc",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the processor learned about one file.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedFile {
    pub file_name: String,
    /// Guessed MIME type, or `"unknown"`.
    pub file_type: String,
    pub category: FileCategory,
    pub file_size: u64,
    pub created_at: u64,
    pub modified_at: u64,
    /// Whether `text` holds the full content rather than a sample.
    pub deep: bool,
    /// Extracted text; `None` for non-text files and failed reads.
    pub text: Option<String>,
    /// Why text extraction failed, if it did.
    pub text_error: Option<String>,
}

impl ProcessedFile {
    /// The extracted text if it has any non-whitespace content.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct FileProcessor {
    sample_size: usize,
}

impl Default for FileProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE)
    }
}

impl FileProcessor {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    /// Inspect a file. With `deep`, the whole text is read; otherwise only
    /// the first `sample_size` characters.
    pub fn process(&self, path: &Path, deep: bool) -> Result<ProcessedFile> {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(
                    "file",
                    path.display().to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(Error::Validation(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let mime = mime_guess::from_path(path).first();
        let file_type = mime
            .as_ref()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let modified = meta.modified().ok();
        let created = meta.created().ok().or(modified);

        let mut processed = ProcessedFile {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_type,
            category: FileCategory::of(path),
            file_size: meta.len(),
            created_at: epoch_secs(created),
            modified_at: epoch_secs(modified),
            deep,
            text: None,
            text_error: None,
        };

        let is_text = mime
            .as_ref()
            .is_some_and(|m| m.type_() == mime_guess::mime::TEXT)
            || has_text_extension(path);
        if is_text {
            let limit = if deep { None } else { Some(self.sample_size) };
            match read_text(path, limit) {
                Ok(text) => processed.text = Some(text),
                Err(e) => processed.text_error = Some(e.to_string()),
            }
        }

        Ok(processed)
    }
}

fn epoch_secs(time: Option<SystemTime>) -> u64 {
    time.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

/// Read a file as UTF-8, dropping invalid bytes, keeping at most `limit`
/// characters.
fn read_text(path: &Path, limit: Option<usize>) -> std::io::Result<String> {
    let file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    match limit {
        // A char is at most four bytes.
        Some(max_chars) => {
            file.take((max_chars as u64).saturating_mul(4))
                .read_to_end(&mut bytes)?;
        }
        None => {
            let mut file = file;
            file.read_to_end(&mut bytes)?;
        }
    }

    let decoded = String::from_utf8_lossy(&bytes);
    let chars = decoded.chars().filter(|&c| c != char::REPLACEMENT_CHARACTER);
    Ok(match limit {
        Some(max_chars) => chars.take(max_chars).collect(),
        None => chars.collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_table() {
        let cases = [
            ("train.py", FileCategory::Code),
            ("paper.pdf", FileCategory::Document),
            ("cat.png", FileCategory::Image),
            ("backup.zip", FileCategory::Archive),
            ("rows.csv", FileCategory::Data),
            ("budget.xlsx", FileCategory::Spreadsheet),
            ("deck.pptx", FileCategory::Presentation),
            ("blob.xyz", FileCategory::Misc),
            ("Makefile", FileCategory::Misc),
            ("NOTES.MD", FileCategory::Document),
        ];
        for (name, expected) in cases {
            assert_eq!(FileCategory::of(Path::new(name)), expected, "{name}");
        }
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&FileCategory::Spreadsheet).unwrap();
        assert_eq!(json, "\"spreadsheet\"");
        assert_eq!(FileCategory::Archive.to_string(), "archive");
    }

    #[test]
    fn shallow_processing_samples_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("long.txt");
        std::fs::write(&path, "x".repeat(50)).unwrap();

        let processed = FileProcessor::new(10).process(&path, false).unwrap();
        assert_eq!(processed.file_name, "long.txt");
        assert_eq!(processed.file_type, "text/plain");
        assert_eq!(processed.category, FileCategory::Document);
        assert_eq!(processed.file_size, 50);
        assert!(!processed.deep);
        assert_eq!(processed.text.as_deref(), Some("xxxxxxxxxx"));
        assert!(processed.modified_at > 0);
    }

    #[test]
    fn deep_processing_reads_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("long.md");
        std::fs::write(&path, "y".repeat(50)).unwrap();

        let processed = FileProcessor::new(10).process(&path, true).unwrap();
        assert!(processed.deep);
        assert_eq!(processed.text.unwrap().len(), 50);
    }

    #[test]
    fn sample_counts_characters_not_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("accents.txt");
        std::fs::write(&path, "éééééé").unwrap();

        let processed = FileProcessor::new(4).process(&path, false).unwrap();
        assert_eq!(processed.text.as_deref(), Some("éééé"));
    }

    #[test]
    fn invalid_utf8_bytes_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mixed.log");
        std::fs::write(&path, b"ok\xff\xfe done").unwrap();

        let processed = FileProcessor::default().process(&path, true).unwrap();
        assert_eq!(processed.text.as_deref(), Some("ok done"));
    }

    #[test]
    fn binary_files_have_no_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("photo.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let processed = FileProcessor::default().process(&path, false).unwrap();
        assert_eq!(processed.file_type, "image/png");
        assert_eq!(processed.category, FileCategory::Image);
        assert!(processed.text.is_none());
        assert!(processed.text_error.is_none());
    }

    #[test]
    fn unknown_type_when_unguessable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("blob.xyzzy");
        std::fs::write(&path, "data").unwrap();

        let processed = FileProcessor::default().process(&path, false).unwrap();
        assert_eq!(processed.file_type, "unknown");
        assert_eq!(processed.category, FileCategory::Misc);
        assert!(processed.text.is_none());
    }

    #[test]
    fn whitespace_text_is_not_embeddable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("blank.txt");
        std::fs::write(&path, "  \n\t ").unwrap();

        let processed = FileProcessor::default().process(&path, false).unwrap();
        assert!(processed.text.is_some());
        assert!(processed.non_empty_text().is_none());
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = FileProcessor::default()
            .process(&tmp.path().join("ghost.txt"), false)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "file", .. }));
    }
}
