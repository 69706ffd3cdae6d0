//! Campaign classification screen: classify campaigns, browse them, and move
//! classifications in and out as CSV.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use kolet_core::{CampaignType, ChannelType, Classification, ClassificationUpdate};
use kolet_store::{
    CampaignSearch, CampaignSummary, ClassificationChange, ClassificationFailure, ClassificationStats, ClassifyReport,
};

use crate::dashboard::{io_error, Dashboard};
use crate::error::DashboardError;

/// Header of the exported file. Import needs the first, third and fourth.
pub const EXPORT_HEADER: [&str; 7] = [
    "campaign_name",
    "source",
    "campaign_type",
    "channel_type",
    "records",
    "total_cost",
    "total_installs",
];

impl Dashboard {
    /// Classify one campaign. Returns `false` if nothing changed.
    pub fn classify(&self, update: &ClassificationUpdate) -> Result<bool, DashboardError> {
        Ok(self.store.lock().classify(update)?)
    }

    pub fn classify_many(&self, updates: &[ClassificationUpdate]) -> Result<ClassifyReport, DashboardError> {
        Ok(self.store.lock().classify_many(updates)?)
    }

    pub fn unclassify(&self, campaign: &str) -> Result<bool, DashboardError> {
        Ok(self.store.lock().unclassify(campaign)?)
    }

    pub fn clear_classifications(&self) -> Result<u64, DashboardError> {
        Ok(self.store.lock().clear_classifications()?)
    }

    pub fn classification(&self, campaign: &str) -> Result<Option<Classification>, DashboardError> {
        Ok(self.store.lock().classification(campaign)?)
    }

    pub fn classifications(&self) -> Result<Vec<Classification>, DashboardError> {
        Ok(self.store.lock().classifications()?)
    }

    pub fn campaigns(&self) -> Result<Vec<CampaignSummary>, DashboardError> {
        Ok(self.store.lock().campaigns()?)
    }

    pub fn unclassified_campaigns(&self) -> Result<Vec<CampaignSummary>, DashboardError> {
        Ok(self.store.lock().unclassified_campaigns()?)
    }

    pub fn search_campaigns(&self, search: &CampaignSearch) -> Result<Vec<CampaignSummary>, DashboardError> {
        Ok(self.store.lock().search_campaigns(search)?)
    }

    pub fn classification_history(&self, campaign: Option<&str>) -> Result<Vec<ClassificationChange>, DashboardError> {
        Ok(self.store.lock().classification_history(campaign)?)
    }

    pub fn classification_stats(&self) -> Result<ClassificationStats, DashboardError> {
        Ok(self.store.lock().classification_stats()?)
    }

    /// Write every campaign with its classification and totals. Unclassified
    /// campaigns get empty type columns. Returns the number of data rows.
    pub fn export_classifications<W: Write>(&self, out: W) -> Result<usize, DashboardError> {
        let campaigns = self.campaigns()?;
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(EXPORT_HEADER)?;
        for campaign in &campaigns {
            let sources = campaign.sources.join("; ");
            let (records, cost, installs) = (
                campaign.records.to_string(),
                campaign.cost.to_string(),
                campaign.installs.to_string(),
            );
            writer.write_record([
                campaign.campaign.as_str(),
                sources.as_str(),
                campaign.campaign_type.map_or("", |t| t.as_str()),
                campaign.channel_type.map_or("", |c| c.as_str()),
                records.as_str(),
                cost.as_str(),
                installs.as_str(),
            ])?;
        }
        writer.flush().map_err(|e| DashboardError::Csv { reason: e.to_string() })?;
        Ok(campaigns.len())
    }

    pub fn export_classifications_to(&self, path: &Path) -> Result<usize, DashboardError> {
        let file = File::create(path).map_err(|e| io_error(path, e))?;
        let rows = self.export_classifications(file)?;
        log::info!("exported {rows} campaigns to {}", path.display());
        Ok(rows)
    }

    /// Apply classifications from CSV, in one store transaction.
    ///
    /// Needs `campaign_name`, `campaign_type` and `channel_type` columns;
    /// other columns are ignored, so an export can be edited and imported
    /// back. Rows missing either label are skipped. Unknown labels and
    /// unknown campaigns are reported per row.
    pub fn import_classifications<R: Read>(&self, input: R) -> Result<ClassifyReport, DashboardError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);
        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
                .ok_or_else(|| DashboardError::Csv {
                    reason: format!("missing column '{name}'"),
                })
        };
        let (campaign_col, type_col, channel_col) =
            (column("campaign_name")?, column("campaign_type")?, column("channel_type")?);

        let mut updates = Vec::new();
        let mut skipped = 0;
        let mut invalid = Vec::new();
        for record in reader.records() {
            let record = record?;
            let field = |idx: usize| record.get(idx).unwrap_or("");
            let (campaign, campaign_type, channel_type) = (field(campaign_col), field(type_col), field(channel_col));
            if campaign.is_empty() || campaign_type.is_empty() || channel_type.is_empty() {
                skipped += 1;
                continue;
            }
            let parsed = campaign_type
                .parse::<CampaignType>()
                .and_then(|t| channel_type.parse::<ChannelType>().map(|c| (t, c)));
            match parsed {
                Ok((t, c)) => updates.push(ClassificationUpdate::new(campaign, t, c)),
                Err(e) => invalid.push(ClassificationFailure {
                    campaign: campaign.to_string(),
                    reason: e.to_string(),
                }),
            }
        }

        let mut report = self.classify_many(&updates)?;
        report.skipped = skipped;
        invalid.append(&mut report.failed);
        report.failed = invalid;
        log::info!(
            "classification import: {} applied, {} unchanged, {} skipped, {} failed",
            report.applied,
            report.unchanged,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }
}
