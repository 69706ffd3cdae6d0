//! Campaign classification: a type and channel per campaign name, kept next
//! to the records and overlaid onto them on read.
//!
//! Every change is written to `classification_history` and moves the store
//! revision, because grouped results by `campaign_type` depend on it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use kolet_core::{CampaignType, ChannelType, Classification, ClassificationUpdate, ParseClassificationError};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::StoreError;
use crate::schema::{read_revision, write_revision};
use crate::store::Store;

const CLASSIFICATION_COLUMNS: &str = "campaign, campaign_type, channel_type, created_at, updated_at";

/// One row of the classification audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationChange {
    pub campaign: String,
    /// `None` when the classification was removed.
    pub campaign_type: Option<CampaignType>,
    pub channel_type: Option<ChannelType>,
    /// `None` for a first classification.
    pub previous_type: Option<CampaignType>,
    pub previous_channel: Option<ChannelType>,
    pub changed_at: DateTime<Utc>,
}

/// Progress of the classification work over the known campaigns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationStats {
    /// Distinct campaign names among stored records.
    pub total_campaigns: u64,
    pub classified: u64,
    pub unclassified: u64,
    /// Percentage of known campaigns with a classification, two decimals.
    pub classification_rate: Decimal,
    pub by_type: BTreeMap<CampaignType, u64>,
    pub by_channel: BTreeMap<ChannelType, u64>,
    pub last_update: Option<DateTime<Utc>>,
}

/// A campaign as seen by the classification screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignSummary {
    pub campaign: String,
    /// Distinct sources of the campaign's records, sorted.
    pub sources: Vec<String>,
    pub campaign_type: Option<CampaignType>,
    pub channel_type: Option<ChannelType>,
    pub records: u64,
    pub cost: Decimal,
    pub installs: Decimal,
}

impl CampaignSummary {
    pub fn is_classified(&self) -> bool {
        self.campaign_type.is_some()
    }
}

/// Campaign search criteria. Empty criteria match every campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignSearch {
    /// Case-insensitive substring of the campaign name.
    pub text: Option<String>,
    pub campaign_type: Option<CampaignType>,
    pub channel_type: Option<ChannelType>,
}

impl CampaignSearch {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn campaign_type(mut self, campaign_type: CampaignType) -> Self {
        self.campaign_type = Some(campaign_type);
        self
    }

    pub fn channel_type(mut self, channel_type: ChannelType) -> Self {
        self.channel_type = Some(channel_type);
        self
    }

    pub fn matches(&self, summary: &CampaignSummary) -> bool {
        let text_ok = match self.text.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => summary.campaign.to_lowercase().contains(&needle.to_lowercase()),
        };
        text_ok
            && self.campaign_type.map_or(true, |t| summary.campaign_type == Some(t))
            && self.channel_type.map_or(true, |c| summary.channel_type == Some(c))
    }
}

/// Outcome of a classification batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifyReport {
    pub applied: u64,
    /// Already classified that way.
    pub unchanged: u64,
    /// Input rows without a complete classification (CSV import only).
    pub skipped: u64,
    pub failed: Vec<ClassificationFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationFailure {
    pub campaign: String,
    pub reason: String,
}

impl Store {
    /// Classify one campaign. Returns `false` when it already had exactly
    /// this classification. The campaign must occur in stored records.
    pub fn classify(&mut self, update: &ClassificationUpdate) -> Result<bool, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = apply(&tx, update, Utc::now())?;
        if changed {
            let revision = bump_revision(&tx)?;
            log::info!(
                "campaign '{}' classified {}/{} (revision {revision})",
                update.campaign,
                update.campaign_type,
                update.channel_type
            );
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Classify many campaigns in one transaction. Unknown campaigns are
    /// reported and skipped; the rest are applied.
    pub fn classify_many(&mut self, updates: &[ClassificationUpdate]) -> Result<ClassifyReport, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let mut report = ClassifyReport::default();
        for update in updates {
            match apply(&tx, update, now) {
                Ok(true) => report.applied += 1,
                Ok(false) => report.unchanged += 1,
                Err(StoreError::UnknownCampaign(campaign)) => report.failed.push(ClassificationFailure {
                    reason: format!("no records for campaign '{campaign}'"),
                    campaign,
                }),
                Err(e) => return Err(e),
            }
        }
        if report.applied > 0 {
            let revision = bump_revision(&tx)?;
            log::info!(
                "classified {} campaigns, {} unchanged, {} failed (revision {revision})",
                report.applied,
                report.unchanged,
                report.failed.len()
            );
        }
        tx.commit()?;
        Ok(report)
    }

    /// Remove the classification of `campaign`. Returns `false` if it had none.
    pub fn unclassify(&mut self, campaign: &str) -> Result<bool, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(current) = load_classification(&tx, campaign)? else {
            return Ok(false);
        };
        tx.execute("DELETE FROM campaign_classification WHERE campaign = ?1", params![campaign])?;
        record_change(&tx, campaign, None, Some(&current), Utc::now())?;
        let revision = bump_revision(&tx)?;
        tx.commit()?;
        log::info!("classification of campaign '{campaign}' removed (revision {revision})");
        Ok(true)
    }

    /// Remove every classification. Returns how many were removed.
    pub fn clear_classifications(&mut self) -> Result<u64, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = load_classifications(&tx)?;
        if current.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        for classification in &current {
            record_change(&tx, &classification.campaign, None, Some(classification), now)?;
        }
        tx.execute("DELETE FROM campaign_classification", [])?;
        let revision = bump_revision(&tx)?;
        tx.commit()?;
        log::info!("removed {} classifications (revision {revision})", current.len());
        Ok(current.len() as u64)
    }

    pub fn classification(&self, campaign: &str) -> Result<Option<Classification>, StoreError> {
        load_classification(&self.conn, campaign)
    }

    /// Every stored classification, most recently changed first.
    pub fn classifications(&self) -> Result<Vec<Classification>, StoreError> {
        load_classifications(&self.conn)
    }

    /// Every campaign of the stored records with its classification and
    /// totals, by name.
    pub fn campaigns(&self) -> Result<Vec<CampaignSummary>, StoreError> {
        let classified: BTreeMap<String, Classification> = load_classifications(&self.conn)?
            .into_iter()
            .map(|c| (c.campaign.clone(), c))
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT json_extract(dimensions, '$.campaign'), json_extract(dimensions, '$.source'), measures, id
             FROM records
             WHERE json_extract(dimensions, '$.campaign') IS NOT NULL",
        )?;
        let mut rows = stmt.query([])?;
        let mut summaries: BTreeMap<String, (CampaignSummary, BTreeSet<String>)> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let campaign: String = row.get(0)?;
            let source: Option<String> = row.get(1)?;
            let measures: String = row.get(2)?;
            let id: String = row.get(3)?;
            let measures: BTreeMap<String, Decimal> = serde_json::from_str(&measures).map_err(|e| StoreError::Corrupt {
                id,
                reason: format!("measures: {e}"),
            })?;

            let (summary, sources) = summaries.entry(campaign.clone()).or_insert_with(|| {
                let classification = classified.get(&campaign);
                let summary = CampaignSummary {
                    campaign: campaign.clone(),
                    sources: Vec::new(),
                    campaign_type: classification.map(|c| c.campaign_type),
                    channel_type: classification.map(|c| c.channel_type),
                    records: 0,
                    cost: Decimal::ZERO,
                    installs: Decimal::ZERO,
                };
                (summary, BTreeSet::new())
            });
            summary.records += 1;
            let measure = |name: &str| measures.get(name).copied().unwrap_or(Decimal::ZERO);
            summary.cost = summary.cost.saturating_add(measure("cost"));
            summary.installs = summary.installs.saturating_add(measure("installs"));
            if let Some(source) = source {
                sources.insert(source);
            }
        }

        Ok(summaries
            .into_values()
            .map(|(mut summary, sources)| {
                summary.sources = sources.into_iter().collect();
                summary
            })
            .collect())
    }

    /// Campaigns of the stored records that have no classification yet.
    pub fn unclassified_campaigns(&self) -> Result<Vec<CampaignSummary>, StoreError> {
        Ok(self.campaigns()?.into_iter().filter(|c| !c.is_classified()).collect())
    }

    pub fn search_campaigns(&self, search: &CampaignSearch) -> Result<Vec<CampaignSummary>, StoreError> {
        Ok(self.campaigns()?.into_iter().filter(|c| search.matches(c)).collect())
    }

    /// Classification changes, newest first, optionally for one campaign.
    pub fn classification_history(&self, campaign: Option<&str>) -> Result<Vec<ClassificationChange>, StoreError> {
        let mut sql = String::from(
            "SELECT campaign, campaign_type, channel_type, previous_type, previous_channel, changed_at
             FROM classification_history",
        );
        if campaign.is_some() {
            sql.push_str(" WHERE campaign = ?1");
        }
        sql.push_str(" ORDER BY id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = match campaign {
            Some(name) => stmt.query(params![name])?,
            None => stmt.query([])?,
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let campaign: String = row.get(0)?;
            out.push(ClassificationChange {
                campaign_type: parse_optional(&campaign, row.get(1)?)?,
                channel_type: parse_optional(&campaign, row.get(2)?)?,
                previous_type: parse_optional(&campaign, row.get(3)?)?,
                previous_channel: parse_optional(&campaign, row.get(4)?)?,
                changed_at: parse_time(&campaign, row.get(5)?)?,
                campaign,
            });
        }
        Ok(out)
    }

    pub fn classification_stats(&self) -> Result<ClassificationStats, StoreError> {
        let campaigns = self.campaigns()?;
        let total = campaigns.len() as u64;
        let mut by_type = BTreeMap::new();
        let mut by_channel = BTreeMap::new();
        for campaign in &campaigns {
            if let (Some(t), Some(c)) = (campaign.campaign_type, campaign.channel_type) {
                *by_type.entry(t).or_insert(0) += 1;
                *by_channel.entry(c).or_insert(0) += 1;
            }
        }
        let classified: u64 = by_type.values().sum();
        let classification_rate = if total == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(classified) * Decimal::ONE_HUNDRED / Decimal::from(total))
                .round_dp(2)
                .normalize()
        };

        let last: Option<String> =
            self.conn
                .query_row("SELECT MAX(updated_at) FROM campaign_classification", [], |r| r.get(0))?;
        let last_update = last.map(|raw| parse_time("campaign_classification", raw)).transpose()?;

        Ok(ClassificationStats {
            total_campaigns: total,
            classified,
            unclassified: total - classified,
            classification_rate,
            by_type,
            by_channel,
            last_update,
        })
    }
}

/// Write `update` unless it is already in place. Returns whether anything
/// changed; the caller moves the revision.
fn apply(tx: &Transaction<'_>, update: &ClassificationUpdate, now: DateTime<Utc>) -> Result<bool, StoreError> {
    let known: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM records WHERE json_extract(dimensions, '$.campaign') = ?1)",
        params![update.campaign],
        |r| r.get(0),
    )?;
    if !known {
        return Err(StoreError::UnknownCampaign(update.campaign.clone()));
    }

    let current = load_classification(tx, &update.campaign)?;
    if let Some(current) = &current {
        if current.campaign_type == update.campaign_type && current.channel_type == update.channel_type {
            return Ok(false);
        }
    }
    tx.execute(
        "INSERT INTO campaign_classification (campaign, campaign_type, channel_type, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(campaign) DO UPDATE SET
            campaign_type = excluded.campaign_type,
            channel_type = excluded.channel_type,
            updated_at = excluded.updated_at",
        params![
            update.campaign,
            update.campaign_type.as_str(),
            update.channel_type.as_str(),
            now.to_rfc3339(),
        ],
    )?;
    record_change(tx, &update.campaign, Some(update), current.as_ref(), now)?;
    Ok(true)
}

fn record_change(
    tx: &Transaction<'_>,
    campaign: &str,
    new: Option<&ClassificationUpdate>,
    previous: Option<&Classification>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO classification_history
            (campaign, campaign_type, channel_type, previous_type, previous_channel, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            campaign,
            new.map(|u| u.campaign_type.as_str()),
            new.map(|u| u.channel_type.as_str()),
            previous.map(|c| c.campaign_type.as_str()),
            previous.map(|c| c.channel_type.as_str()),
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn bump_revision(tx: &Transaction<'_>) -> Result<u64, StoreError> {
    let revision = read_revision(tx)? + 1;
    write_revision(tx, revision)?;
    Ok(revision)
}

fn load_classification(conn: &Connection, campaign: &str) -> Result<Option<Classification>, StoreError> {
    let sql = format!("SELECT {CLASSIFICATION_COLUMNS} FROM campaign_classification WHERE campaign = ?1");
    let raw = conn
        .query_row(&sql, params![campaign], raw_classification)
        .optional()?;
    raw.map(decode_classification).transpose()
}

fn load_classifications(conn: &Connection) -> Result<Vec<Classification>, StoreError> {
    let sql = format!(
        "SELECT {CLASSIFICATION_COLUMNS} FROM campaign_classification ORDER BY updated_at DESC, campaign"
    );
    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map([], raw_classification)?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(decode_classification).collect()
}

type RawClassification = (String, String, String, String, String);

fn raw_classification(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawClassification> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_classification(raw: RawClassification) -> Result<Classification, StoreError> {
    let (campaign, campaign_type, channel_type, created_at, updated_at) = raw;
    Ok(Classification {
        campaign_type: parse_label(&campaign, &campaign_type)?,
        channel_type: parse_label(&campaign, &channel_type)?,
        created_at: parse_time(&campaign, created_at)?,
        updated_at: parse_time(&campaign, updated_at)?,
        campaign,
    })
}

fn parse_label<T>(campaign: &str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = ParseClassificationError>,
{
    raw.parse::<T>().map_err(|e| StoreError::Corrupt {
        id: campaign.to_string(),
        reason: e.to_string(),
    })
}

fn parse_optional<T>(campaign: &str, raw: Option<String>) -> Result<Option<T>, StoreError>
where
    T: std::str::FromStr<Err = ParseClassificationError>,
{
    raw.map(|raw| parse_label(campaign, &raw)).transpose()
}

fn parse_time(id: &str, raw: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("classification time '{raw}': {e}"),
        })
}
