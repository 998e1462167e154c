// Document type detection from file extensions.

use std::path::Path;

/// Extensions the tool registers itself for.
pub const SUPPORTED_EXTENSIONS: [&str; 6] = [".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx"];

/// Which web editor a file opens in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    Document,
    Spreadsheet,
    Presentation,
}

impl DocumentType {
    /// Map an extension (with or without the leading dot, any case).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "doc" | "docx" => Some(Self::Document),
            "xls" | "xlsx" => Some(Self::Spreadsheet),
            "ppt" | "pptx" => Some(Self::Presentation),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// URL path segment of the editor.
    pub fn editor_segment(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Spreadsheet => "spreadsheets",
            Self::Presentation => "presentation",
        }
    }

    /// Editor URL for a remote document, e.g.
    /// `https://docs.google.com/document/d/<id>/edit`.
    pub fn editor_url(&self, base: &str, document_id: &str) -> String {
        format!(
            "{}/{}/d/{}/edit",
            base.trim_end_matches('/'),
            self.editor_segment(),
            document_id
        )
    }
}

/// Best guess at the upload content type.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => "application/octet-stream",
    }
}
