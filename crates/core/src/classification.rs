//! Campaign classification: a marketing-side label attached to a campaign
//! name, not to individual records. The store overlays it onto records as
//! the `campaign_type` and `channel_type` dimensions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dimension name carrying the campaign type on read.
pub const CAMPAIGN_TYPE_DIMENSION: &str = "campaign_type";
/// Dimension name carrying the channel type on read.
pub const CHANNEL_TYPE_DIMENSION: &str = "channel_type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    Branding,
    Acquisition,
    Retargeting,
}

impl CampaignType {
    pub const ALL: [CampaignType; 3] = [Self::Branding, Self::Acquisition, Self::Retargeting];

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignType::Branding => "branding",
            CampaignType::Acquisition => "acquisition",
            CampaignType::Retargeting => "retargeting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    App,
    Web,
}

impl ChannelType {
    pub const ALL: [ChannelType; 2] = [Self::App, Self::Web];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::App => "app",
            ChannelType::Web => "web",
        }
    }
}

/// A label that is not one of the known campaign or channel types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseClassificationError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseClassificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseClassificationError {}

fn parse_label<T: Copy>(
    raw: &str,
    all: &[T],
    as_str: fn(&T) -> &'static str,
    kind: &'static str,
) -> Result<T, ParseClassificationError> {
    let wanted = raw.trim().to_lowercase();
    all.iter()
        .find(|candidate| as_str(candidate) == wanted)
        .copied()
        .ok_or_else(|| ParseClassificationError {
            kind,
            value: raw.to_string(),
        })
}

impl FromStr for CampaignType {
    type Err = ParseClassificationError;

    /// Case-insensitive; surrounding blanks are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_label(s, &Self::ALL, Self::as_str, "campaign type")
    }
}

impl FromStr for ChannelType {
    type Err = ParseClassificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_label(s, &Self::ALL, Self::as_str, "channel type")
    }
}

impl fmt::Display for CampaignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested classification for one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationUpdate {
    pub campaign: String,
    pub campaign_type: CampaignType,
    pub channel_type: ChannelType,
}

impl ClassificationUpdate {
    pub fn new(campaign: impl Into<String>, campaign_type: CampaignType, channel_type: ChannelType) -> Self {
        Self {
            campaign: campaign.into(),
            campaign_type,
            channel_type,
        }
    }
}

/// Stored classification of one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub campaign: String,
    pub campaign_type: CampaignType,
    pub channel_type: ChannelType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
