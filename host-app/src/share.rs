//! Share-sheet requests.

use std::path::{Path, PathBuf};

use snaply_ipc::{ErrorCode, PluginError};

use crate::error::HostError;

/// MIME type used when several files are shared at once.
pub const ANY_MIME_TYPE: &str = "*/*";

/// Subject used when several files are shared at once.
pub const MULTI_FILE_SUBJECT: &str = "Snaply Report Files";

/// Host share sheet.
pub trait FileSharer: Send + Sync {
    /// Present the share sheet for `request`.
    fn share(&self, request: &ShareRequest) -> Result<(), HostError>;
}

/// A validated share request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRequest {
    /// Files to share, all known to exist.
    pub files: Vec<PathBuf>,

    /// MIME type announced to the share sheet.
    pub mime_type: String,

    /// Subject/title of the share.
    pub subject: String,
}

impl ShareRequest {
    /// Validate `paths` and describe the share.
    ///
    /// Fails with `MISSING_FILES` if the list is empty or any file is missing.
    pub fn build(paths: &[String]) -> Result<Self, PluginError> {
        if paths.is_empty() {
            return Err(PluginError::new(ErrorCode::MissingFiles, "No files to share"));
        }

        let files: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();
        let missing: Vec<&str> = files
            .iter()
            .zip(paths)
            .filter(|(file, _)| !file.is_file())
            .map(|(_, path)| path.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(PluginError::new(
                ErrorCode::MissingFiles,
                format!("One or more files do not exist: {}", missing.join(", ")),
            ));
        }

        let (mime_type, subject) = match files.as_slice() {
            [single] => {
                let extension = single
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default();
                (
                    mime_type_for(single).to_string(),
                    format!("snaply_report.{extension}"),
                )
            }
            _ => (ANY_MIME_TYPE.to_string(), MULTI_FILE_SUBJECT.to_string()),
        };

        Ok(Self {
            files,
            mime_type,
            subject,
        })
    }
}

/// MIME type for a file, by extension.
pub fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => ANY_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("snaply_share_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_mime_type_by_extension() {
        assert_eq!(mime_type_for(Path::new("a/screen_recording.mp4")), "video/mp4");
        assert_eq!(mime_type_for(Path::new("shot.JPEG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("logs.txt")), "text/plain");
        assert_eq!(mime_type_for(Path::new("report")), "*/*");
    }

    #[test]
    fn test_single_file_request() {
        let dir = temp_dir("single");
        let file = dir.join("screen_recording.mp4");
        fs::write(&file, b"mp4").unwrap();

        let request = ShareRequest::build(&[file.display().to_string()]).unwrap();
        assert_eq!(request.mime_type, "video/mp4");
        assert_eq!(request.subject, "snaply_report.mp4");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_multiple_files_request() {
        let dir = temp_dir("multi");
        let video = dir.join("screen_recording.mp4");
        let logs = dir.join("logs.json");
        fs::write(&video, b"mp4").unwrap();
        fs::write(&logs, b"{}").unwrap();

        let request =
            ShareRequest::build(&[video.display().to_string(), logs.display().to_string()])
                .unwrap();
        assert_eq!(request.files.len(), 2);
        assert_eq!(request.mime_type, ANY_MIME_TYPE);
        assert_eq!(request.subject, MULTI_FILE_SUBJECT);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = temp_dir("missing");
        let present = dir.join("logs.txt");
        fs::write(&present, b"log").unwrap();
        let absent = dir.join("gone.mp4").display().to_string();

        let err = ShareRequest::build(&[present.display().to_string(), absent.clone()]).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingFiles);
        assert!(err.message.contains(&absent));

        let err = ShareRequest::build(&[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingFiles);
        let _ = fs::remove_dir_all(dir);
    }
}
