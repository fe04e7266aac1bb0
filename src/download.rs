//! Attachment and `.eml` downloads.
//!
//! Every download goes through a confirmation step first; the blob is then
//! fetched with the session's cookies and written into the download
//! directory without overwriting existing files.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

use crate::client::MailApi;
use crate::error::Result;
use crate::models::Attachment;

/// Coarse file category used to pick an icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Pdf,
    Document,
    Spreadsheet,
    Presentation,
    Archive,
    Audio,
    Video,
    Text,
    Other,
}

impl AttachmentKind {
    /// Classify by MIME type, falling back to the file extension.
    pub fn detect(content_type: &str, filename: &str) -> Self {
        let mime = content_type.to_ascii_lowercase();
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime == "application/pdf" || ext == "pdf" {
            Self::Pdf
        } else if mime.contains("spreadsheet") || mime.contains("excel") || matches!(ext.as_str(), "xls" | "xlsx" | "csv" | "ods") {
            Self::Spreadsheet
        } else if mime.contains("presentation") || mime.contains("powerpoint") || matches!(ext.as_str(), "ppt" | "pptx" | "odp") {
            Self::Presentation
        } else if mime.contains("word") || mime.contains("opendocument.text") || matches!(ext.as_str(), "doc" | "docx" | "odt" | "rtf") {
            Self::Document
        } else if mime.contains("zip") || mime.contains("compressed") || mime.contains("tar") || matches!(ext.as_str(), "zip" | "rar" | "7z" | "gz" | "tar") {
            Self::Archive
        } else if mime.starts_with("text/") || ext == "txt" {
            Self::Text
        } else {
            Self::Other
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Image => "file-image",
            Self::Pdf => "file-pdf",
            Self::Document => "file-word",
            Self::Spreadsheet => "file-excel",
            Self::Presentation => "file-powerpoint",
            Self::Archive => "file-zipper",
            Self::Audio => "file-audio",
            Self::Video => "file-video",
            Self::Text => "file-lines",
            Self::Other => "file",
        }
    }
}

/// Human readable size with base-1024 units: `1536` → `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{value:.1}");
    let text = text.strip_suffix(".0").unwrap_or(&text);
    format!("{text} {}", UNITS[unit])
}

fn disposition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)filename\*?\s*=\s*(?:UTF-8'')?(?:"([^"]+)"|([^;\s]+))"#)
            .expect("static regex")
    })
}

/// Suggested file name from a `Content-Disposition` header.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let caps = disposition_re().captures(header)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let name = sanitize_filename(raw);
    (!name.is_empty()).then_some(name)
}

/// Strip directory components and control characters from a name.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .trim_start_matches('.')
        .to_string()
}

/// What the user is asked before a download starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPrompt {
    pub filename: String,
    pub size: Option<String>,
}

/// Confirmation step shown before any download.
pub trait Confirm {
    fn confirm(&self, prompt: &DownloadPrompt) -> bool;
}

impl<F: Fn(&DownloadPrompt) -> bool> Confirm for F {
    fn confirm(&self, prompt: &DownloadPrompt) -> bool {
        self(prompt)
    }
}

/// Confirm → fetch → save.
pub struct DownloadManager<'a, A: MailApi + ?Sized> {
    api: &'a A,
    dir: PathBuf,
}

impl<'a, A: MailApi + ?Sized> DownloadManager<'a, A> {
    pub fn new(api: &'a A, dir: impl Into<PathBuf>) -> Self {
        Self {
            api,
            dir: dir.into(),
        }
    }

    /// Save one attachment. `Ok(None)` when the user declined.
    pub async fn download_attachment(
        &self,
        message_id: u64,
        attachment: &Attachment,
        confirm: &impl Confirm,
    ) -> Result<Option<PathBuf>> {
        let prompt = DownloadPrompt {
            filename: attachment.filename.clone(),
            size: Some(format_size(attachment.size)),
        };
        if !confirm.confirm(&prompt) {
            return Ok(None);
        }
        let blob = self
            .api
            .download_attachment(message_id, &attachment.id)
            .await?;
        let name = Some(sanitize_filename(&attachment.filename))
            .filter(|n| !n.is_empty())
            .or(blob.filename)
            .unwrap_or_else(|| format!("attachment-{}", attachment.id));
        self.save(&name, &blob.bytes).await.map(Some)
    }

    /// Save the whole message as `.eml`. `Ok(None)` when the user declined.
    pub async fn download_message(
        &self,
        message_id: u64,
        subject: &str,
        confirm: &impl Confirm,
    ) -> Result<Option<PathBuf>> {
        let fallback = format!("message-{message_id}.eml");
        let prompt = DownloadPrompt {
            filename: if subject.trim().is_empty() {
                fallback.clone()
            } else {
                format!("{}.eml", subject.trim())
            },
            size: None,
        };
        if !confirm.confirm(&prompt) {
            return Ok(None);
        }
        let blob = self.api.download_message(message_id).await?;
        let name = blob.filename.unwrap_or(fallback);
        self.save(&name, &blob.bytes).await.map(Some)
    }

    async fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = unique_path(&self.dir, name);
        tokio::fs::write(&path, bytes).await?;
        info!(path = %path.display(), bytes = bytes.len(), "download saved");
        Ok(path)
    }
}

/// `dir/name`, or `dir/name (n).ext` when that already exists.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let ext = path.extension().and_then(|e| e.to_str());
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes_base_1024() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5 MB");
    }

    #[test]
    fn detects_kinds() {
        assert_eq!(AttachmentKind::detect("image/png", "a.png"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::detect("application/octet-stream", "x.PDF"), AttachmentKind::Pdf);
        assert_eq!(
            AttachmentKind::detect("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet", "s.xlsx"),
            AttachmentKind::Spreadsheet
        );
        assert_eq!(AttachmentKind::detect("application/zip", "a.zip"), AttachmentKind::Archive);
        assert_eq!(AttachmentKind::detect("", "blob"), AttachmentKind::Other);
        assert_eq!(AttachmentKind::Other.icon(), "file");
    }

    #[test]
    fn parses_content_disposition() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="Welcome mail.eml""#).as_deref(),
            Some("Welcome mail.eml")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=plain.eml").as_deref(),
            Some("plain.eml")
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="../../etc/passwd""#).as_deref(),
            Some("passwd")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn unique_path_does_not_overwrite() {
        let dir = std::env::temp_dir().join(format!("tempmail-dl-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let first = unique_path(&dir, "a.txt");
        std::fs::write(&first, b"x").unwrap();
        let second = unique_path(&dir, "a.txt");
        assert_eq!(second, dir.join("a (1).txt"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn closures_confirm() {
        let prompt = DownloadPrompt {
            filename: "x".into(),
            size: None,
        };
        let yes = |_: &DownloadPrompt| true;
        assert!(yes.confirm(&prompt));
    }
}
