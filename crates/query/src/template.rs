use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Name of a dimension field.
    Dimension,
    /// Name of a measure field.
    Measure,
    /// Comma-separated measure names.
    MeasureList,
    /// Comma-separated derived metric names.
    MetricList,
    /// `YYYY-MM-DD`, inclusive.
    Date,
    /// Positive integer.
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

/// What a template is called and what it accepts, for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

const FROM: ParamSpec = ParamSpec {
    name: "from",
    kind: ParamKind::Date,
    required: false,
    description: "First day included",
};

const TO: ParamSpec = ParamSpec {
    name: "to",
    kind: ParamKind::Date,
    required: false,
    description: "Last day included",
};

const MONTHLY_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "category",
        kind: ParamKind::Dimension,
        required: true,
        description: "Dimension to break totals down by",
    },
    ParamSpec {
        name: "measures",
        kind: ParamKind::MeasureList,
        required: false,
        description: "Measures to total; all measures when omitted",
    },
    FROM,
    TO,
];

const TOP_N_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "dimension",
        kind: ParamKind::Dimension,
        required: true,
        description: "Dimension to rank",
    },
    ParamSpec {
        name: "measure",
        kind: ParamKind::Measure,
        required: true,
        description: "Measure summed and ranked on",
    },
    ParamSpec {
        name: "n",
        kind: ParamKind::Count,
        required: false,
        description: "Rows kept (default 10)",
    },
    FROM,
    TO,
];

const SERIES_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "measures",
        kind: ParamKind::MeasureList,
        required: true,
        description: "Measures to total per period",
    },
    ParamSpec {
        name: "dimension",
        kind: ParamKind::Dimension,
        required: false,
        description: "Optional breakdown within each period",
    },
    FROM,
    TO,
];

const TOTALS_PARAMS: &[ParamSpec] = &[FROM, TO];

const KPI_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "dimension",
        kind: ParamKind::Dimension,
        required: true,
        description: "Dimension to compute KPIs for",
    },
    ParamSpec {
        name: "metrics",
        kind: ParamKind::MetricList,
        required: false,
        description: "Derived metrics to include; all when omitted",
    },
    FROM,
    TO,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    MonthlyTotalsByCategory,
    TopNByMeasure,
    DailySeries,
    WeeklySeries,
    Totals,
    KpiByDimension,
}

impl Template {
    pub const ALL: [Template; 6] = [
        Self::MonthlyTotalsByCategory,
        Self::TopNByMeasure,
        Self::DailySeries,
        Self::WeeklySeries,
        Self::Totals,
        Self::KpiByDimension,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::MonthlyTotalsByCategory => "monthly_totals_by_category",
            Self::TopNByMeasure => "top_n_by_measure",
            Self::DailySeries => "daily_series",
            Self::WeeklySeries => "weekly_series",
            Self::Totals => "totals",
            Self::KpiByDimension => "kpi_by_dimension",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn descriptor(&self) -> TemplateDescriptor {
        let (description, params) = match self {
            Self::MonthlyTotalsByCategory => ("Monthly sums of measures per category value", MONTHLY_PARAMS),
            Self::TopNByMeasure => ("Top values of a dimension ranked by a summed measure", TOP_N_PARAMS),
            Self::DailySeries => ("Daily sums of measures", SERIES_PARAMS),
            Self::WeeklySeries => ("Weekly sums of measures, weeks starting Monday", SERIES_PARAMS),
            Self::Totals => ("Every measure summed over the period, plus the record count", TOTALS_PARAMS),
            Self::KpiByDimension => ("Summed measures and ratio KPIs per dimension value", KPI_PARAMS),
        };
        TemplateDescriptor {
            name: self.name(),
            description,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_back() {
        for template in Template::ALL {
            assert_eq!(Template::from_name(template.name()), Some(template));
        }
        assert_eq!(Template::from_name("monthly"), None);
    }

    #[test]
    fn required_params_listed_first() {
        for template in Template::ALL {
            let params = template.descriptor().params;
            let first_optional = params.iter().position(|p| !p.required).unwrap_or(params.len());
            assert!(params[first_optional..].iter().all(|p| !p.required), "{}", template.name());
        }
    }
}
