//! Transfer status of a template on a store.
//!
//! This is passthrough metadata owned by the download/upload pipeline; the
//! association layer only stores it and filters on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Download/upload status of a template on a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Unknown,
    NotDownloaded,
    DownloadInProgress,
    Downloaded,
    DownloadError,
    Abandoned,
    NotUploaded,
    UploadInProgress,
    Uploaded,
    UploadError,
    Creating,
    Created,
    Bypassed,
}

impl DownloadStatus {
    pub const ALL: [DownloadStatus; 13] = [
        Self::Unknown,
        Self::NotDownloaded,
        Self::DownloadInProgress,
        Self::Downloaded,
        Self::DownloadError,
        Self::Abandoned,
        Self::NotUploaded,
        Self::UploadInProgress,
        Self::Uploaded,
        Self::UploadError,
        Self::Creating,
        Self::Created,
        Self::Bypassed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::NotDownloaded => "NOT_DOWNLOADED",
            Self::DownloadInProgress => "DOWNLOAD_IN_PROGRESS",
            Self::Downloaded => "DOWNLOADED",
            Self::DownloadError => "DOWNLOAD_ERROR",
            Self::Abandoned => "ABANDONED",
            Self::NotUploaded => "NOT_UPLOADED",
            Self::UploadInProgress => "UPLOAD_IN_PROGRESS",
            Self::Uploaded => "UPLOADED",
            Self::UploadError => "UPLOAD_ERROR",
            Self::Creating => "CREATING",
            Self::Created => "CREATED",
            Self::Bypassed => "BYPASSED",
        }
    }

    /// Check if the content is fully present on the store.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Downloaded | Self::Uploaded | Self::Bypassed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidDownloadStatus(s.to_string()))
    }
}
