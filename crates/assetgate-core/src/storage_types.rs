use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend selection
///
/// Chosen once from configuration at startup. `CloudWithFallback` composes the
/// cloud driver (primary) with the filesystem driver (fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    Filesystem,
    Cloud,
    CloudWithFallback,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "filesystem" | "local" => Ok(StorageBackend::Filesystem),
            "cloud" | "s3" => Ok(StorageBackend::Cloud),
            "cloud-with-fallback" | "s3-with-fallback" => Ok(StorageBackend::CloudWithFallback),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageBackend::Filesystem => write!(f, "filesystem"),
            StorageBackend::Cloud => write!(f, "cloud"),
            StorageBackend::CloudWithFallback => write!(f, "cloud-with-fallback"),
        }
    }
}

/// Category of a stored asset.
///
/// Drives key templates and bucket routing. A key's category can also be
/// recovered from its prefix, see `assetgate_storage::keys`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileCategory {
    ListingMedia,
    UserAvatar,
    TempUpload,
    SampleData,
    Document,
    Thumbnail,
    Backup,
    Log,
    Unknown,
}

impl FileCategory {
    pub const ALL: [FileCategory; 9] = [
        FileCategory::ListingMedia,
        FileCategory::UserAvatar,
        FileCategory::TempUpload,
        FileCategory::SampleData,
        FileCategory::Document,
        FileCategory::Thumbnail,
        FileCategory::Backup,
        FileCategory::Log,
        FileCategory::Unknown,
    ];

    /// Kebab-case identifier, also substituted for `{category}` in key templates.
    pub fn slug(&self) -> &'static str {
        match self {
            FileCategory::ListingMedia => "listing-media",
            FileCategory::UserAvatar => "user-avatar",
            FileCategory::TempUpload => "temp-upload",
            FileCategory::SampleData => "sample-data",
            FileCategory::Document => "document",
            FileCategory::Thumbnail => "thumbnail",
            FileCategory::Backup => "backup",
            FileCategory::Log => "log",
            FileCategory::Unknown => "unknown",
        }
    }

    /// Suffix used in per-category environment variables (`S3_BUCKET_LISTING_MEDIA`).
    pub fn env_suffix(&self) -> &'static str {
        match self {
            FileCategory::ListingMedia => "LISTING_MEDIA",
            FileCategory::UserAvatar => "USER_AVATAR",
            FileCategory::TempUpload => "TEMP_UPLOAD",
            FileCategory::SampleData => "SAMPLE_DATA",
            FileCategory::Document => "DOCUMENT",
            FileCategory::Thumbnail => "THUMBNAIL",
            FileCategory::Backup => "BACKUP",
            FileCategory::Log => "LOG",
            FileCategory::Unknown => "UNKNOWN",
        }
    }

    /// Template used when no `KEY_TEMPLATE_<CATEGORY>` override is configured.
    pub fn default_template(&self) -> &'static str {
        match self {
            FileCategory::ListingMedia => "listings/{id}/{timestamp}_{filename}",
            FileCategory::UserAvatar => "avatars/{id}/{timestamp}_{filename}",
            FileCategory::TempUpload => "temp/{date}/{uuid}_{filename}",
            FileCategory::SampleData => "samples/{originalPath}",
            FileCategory::Document => "documents/{id}/{timestamp}_{filename}",
            FileCategory::Thumbnail => "thumbnails/{id}/{filename}",
            FileCategory::Backup => "backups/{date}/{timestamp}_{filename}",
            FileCategory::Log => "logs/{date}/{filename}",
            FileCategory::Unknown => "misc/{uuid}_{filename}",
        }
    }
}

impl FromStr for FileCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        FileCategory::ALL
            .into_iter()
            .find(|c| c.slug() == normalized)
            .ok_or_else(|| anyhow::anyhow!("Invalid file category: {}", s))
    }
}

impl Display for FileCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.slug())
    }
}
