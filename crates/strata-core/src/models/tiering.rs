use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TieringRequestType {
    TierDataObject,
    TierCollection,
}

impl Display for TieringRequestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TieringRequestType::TierDataObject => write!(f, "TIER_DATA_OBJECT"),
            TieringRequestType::TierCollection => write!(f, "TIER_COLLECTION"),
        }
    }
}

impl FromStr for TieringRequestType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TIER_DATA_OBJECT" => Ok(TieringRequestType::TierDataObject),
            "TIER_COLLECTION" => Ok(TieringRequestType::TierCollection),
            _ => Err(anyhow::anyhow!("Invalid tiering request type: {}", s)),
        }
    }
}

/// Append-only audit entry for one applied lifecycle rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieringRecord {
    pub id: Uuid,
    pub user_id: String,
    pub request_type: TieringRequestType,
    pub path: String,
    pub s3_archive_configuration_id: String,
    pub key_prefix: String,
    pub storage_class: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieringResponse {
    pub path: String,
    pub key_prefix: String,
    pub s3_archive_configuration_id: String,
    pub record_id: Uuid,
}
