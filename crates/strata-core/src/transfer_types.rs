use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transfer technologies the control plane can drive.
///
/// `S3` is the object-store family (archive and streaming copy), `Globus` the
/// managed-endpoint family. The Google types are destination-only and are served
/// by whatever backend a deployment registers for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataTransferType {
    S3,
    Globus,
    GoogleDrive,
    GoogleCloudStorage,
    Posix,
}

impl DataTransferType {
    /// Object-store archives can only write to local files or other object stores.
    pub fn is_object_store(&self) -> bool {
        matches!(self, DataTransferType::S3 | DataTransferType::Posix)
    }

    pub fn is_managed_endpoint(&self) -> bool {
        matches!(self, DataTransferType::Globus)
    }
}

impl FromStr for DataTransferType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "S3" => Ok(DataTransferType::S3),
            "GLOBUS" => Ok(DataTransferType::Globus),
            "GOOGLE_DRIVE" => Ok(DataTransferType::GoogleDrive),
            "GOOGLE_CLOUD_STORAGE" => Ok(DataTransferType::GoogleCloudStorage),
            "POSIX" => Ok(DataTransferType::Posix),
            _ => Err(anyhow::anyhow!("Invalid data transfer type: {}", s)),
        }
    }
}

impl Display for DataTransferType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DataTransferType::S3 => write!(f, "S3"),
            DataTransferType::Globus => write!(f, "GLOBUS"),
            DataTransferType::GoogleDrive => write!(f, "GOOGLE_DRIVE"),
            DataTransferType::GoogleCloudStorage => write!(f, "GOOGLE_CLOUD_STORAGE"),
            DataTransferType::Posix => write!(f, "POSIX"),
        }
    }
}

/// Vendor behind an S3-compatible archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveProvider {
    Aws,
    Cloudian,
    Cleversafe,
    Vast,
    GoogleCloud,
    Other,
}

/// Providers whose lifecycle rules can move objects to a colder tier.
pub const TIERING_PROVIDERS: &[ArchiveProvider] = &[
    ArchiveProvider::Aws,
    ArchiveProvider::Cloudian,
    ArchiveProvider::Cleversafe,
];

impl ArchiveProvider {
    pub fn supports_tiering(&self) -> bool {
        TIERING_PROVIDERS.contains(self)
    }
}

impl Display for ArchiveProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ArchiveProvider::Aws => write!(f, "AWS"),
            ArchiveProvider::Cloudian => write!(f, "CLOUDIAN"),
            ArchiveProvider::Cleversafe => write!(f, "CLEVERSAFE"),
            ArchiveProvider::Vast => write!(f, "VAST"),
            ArchiveProvider::GoogleCloud => write!(f, "GOOGLE_CLOUD"),
            ArchiveProvider::Other => write!(f, "OTHER"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_type_round_trips_through_text() {
        for t in [
            DataTransferType::S3,
            DataTransferType::Globus,
            DataTransferType::GoogleDrive,
            DataTransferType::GoogleCloudStorage,
            DataTransferType::Posix,
        ] {
            assert_eq!(t.to_string().parse::<DataTransferType>().unwrap(), t);
        }
        assert!("ftp".parse::<DataTransferType>().is_err());
    }

    #[test]
    fn test_transfer_type_families() {
        assert!(DataTransferType::S3.is_object_store());
        assert!(!DataTransferType::S3.is_managed_endpoint());
        assert!(DataTransferType::Globus.is_managed_endpoint());
        assert!(!DataTransferType::GoogleDrive.is_object_store());
    }

    #[test]
    fn test_tiering_allow_list() {
        assert!(ArchiveProvider::Aws.supports_tiering());
        assert!(ArchiveProvider::Cloudian.supports_tiering());
        assert!(!ArchiveProvider::Vast.supports_tiering());
        assert!(!ArchiveProvider::Other.supports_tiering());
    }
}
