use std::sync::Arc;

use kolet_core::{AggFn, AggregationQuery, CancelToken, Column, MeasureSpec, ResultTable, TimeBucket, Value, ValueKind};
use kolet_engine::{AggregationEngine, MeasureKinds};
use kolet_schema::{DerivedMetric, FieldRole, SchemaDefinition};

use crate::error::QueryError;
use crate::params::TemplateParams;
use crate::template::{Template, TemplateDescriptor};

const DEFAULT_TOP_N: usize = 10;

/// Declared kinds of the schema's measures, for [`AggregationEngine::with_measure_kinds`].
pub fn measure_kinds(schema: &SchemaDefinition) -> MeasureKinds {
    schema
        .measures()
        .map(|(name, field)| (name.to_string(), field.kind))
        .collect()
}

/// Entry point for the presentation layer.
///
/// Every query is checked against the reporting schema before the engine
/// sees it, so a bad request fails without scanning anything.
pub struct QueryFacade {
    engine: Arc<AggregationEngine>,
    schema: SchemaDefinition,
}

impl QueryFacade {
    pub fn new(engine: Arc<AggregationEngine>, schema: SchemaDefinition) -> Self {
        Self { engine, schema }
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    pub fn engine(&self) -> &Arc<AggregationEngine> {
        &self.engine
    }

    pub fn list_templates(&self) -> Vec<TemplateDescriptor> {
        Template::ALL.iter().map(Template::descriptor).collect()
    }

    pub fn run_template(&self, name: &str, params: &TemplateParams) -> Result<ResultTable, QueryError> {
        self.run_template_with(name, params, &CancelToken::new())
    }

    pub fn run_template_with(
        &self,
        name: &str,
        params: &TemplateParams,
        cancel: &CancelToken,
    ) -> Result<ResultTable, QueryError> {
        let template = Template::from_name(name).ok_or_else(|| QueryError::UnknownTemplate(name.to_string()))?;
        log::info!("running template '{name}'");
        match template {
            Template::MonthlyTotalsByCategory => self.monthly_totals(params, cancel),
            Template::TopNByMeasure => self.top_n(params, cancel),
            Template::DailySeries => self.series(template, TimeBucket::Day, params, cancel),
            Template::WeeklySeries => self.series(template, TimeBucket::Week, params, cancel),
            Template::Totals => self.totals(params, cancel),
            Template::KpiByDimension => self.kpi_by_dimension(params, cancel),
        }
    }

    /// Validate, then evaluate an arbitrary aggregation query.
    pub fn raw_query(&self, query: &AggregationQuery) -> Result<Arc<ResultTable>, QueryError> {
        self.raw_query_with(query, &CancelToken::new())
    }

    pub fn raw_query_with(
        &self,
        query: &AggregationQuery,
        cancel: &CancelToken,
    ) -> Result<Arc<ResultTable>, QueryError> {
        self.validate(query)?;
        Ok(self.engine.evaluate(query, cancel)?)
    }

    /// Every grouped or filtered field must be a schema dimension and every
    /// aggregated field a schema measure.
    pub fn validate(&self, query: &AggregationQuery) -> Result<(), QueryError> {
        for dimension in &query.dimensions {
            self.check_dimension(dimension)?;
        }
        for dimension in query.filter.dimensions.keys() {
            self.check_dimension(dimension)?;
        }
        for spec in &query.measures {
            self.check_measure(&spec.field)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Field checks
    // -----------------------------------------------------------------------

    fn check_dimension<'a>(&self, name: &'a str) -> Result<&'a str, QueryError> {
        match self.schema.role_of(name) {
            Some(FieldRole::Dimension) => Ok(name),
            _ => Err(QueryError::UnknownField {
                field: name.to_string(),
                expected: "dimension",
            }),
        }
    }

    fn check_measure<'a>(&self, name: &'a str) -> Result<&'a str, QueryError> {
        match self.schema.role_of(name) {
            Some(FieldRole::Measure) => Ok(name),
            _ => Err(QueryError::UnknownField {
                field: name.to_string(),
                expected: "measure",
            }),
        }
    }

    fn check_metric(&self, name: &str) -> Result<&DerivedMetric, QueryError> {
        self.schema.derived_metric(name).ok_or_else(|| QueryError::UnknownField {
            field: name.to_string(),
            expected: "derived metric",
        })
    }

    /// Named measures, or every schema measure when the parameter is absent.
    fn measure_list(&self, params: &TemplateParams, name: &str) -> Result<Vec<String>, QueryError> {
        match params.list(name) {
            Some(list) if list.is_empty() => Err(QueryError::invalid(name, "", "no measures given")),
            Some(list) => {
                for measure in &list {
                    self.check_measure(measure)?;
                }
                Ok(list)
            }
            None => Ok(self.schema.measures().map(|(n, _)| n.to_string()).collect()),
        }
    }

    fn evaluate(&self, query: &AggregationQuery, cancel: &CancelToken) -> Result<ResultTable, QueryError> {
        self.validate(query)?;
        let table = self.engine.evaluate(query, cancel)?;
        Ok(ResultTable::clone(&table))
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    fn monthly_totals(&self, params: &TemplateParams, cancel: &CancelToken) -> Result<ResultTable, QueryError> {
        let template = Template::MonthlyTotalsByCategory.name();
        let category = self.check_dimension(params.required(template, "category")?)?;
        let measures = self.measure_list(params, "measures")?;

        let mut query = AggregationQuery::new()
            .bucket(TimeBucket::Month)
            .group_by(category)
            .filter(params.date_range()?);
        for measure in &measures {
            query = query.measure(measure, AggFn::Sum);
        }
        self.evaluate(&query, cancel)
    }

    /// Sums per dimension value, largest first; ties by dimension value.
    fn top_n(&self, params: &TemplateParams, cancel: &CancelToken) -> Result<ResultTable, QueryError> {
        let template = Template::TopNByMeasure.name();
        let dimension = self.check_dimension(params.required(template, "dimension")?)?;
        let measure = self.check_measure(params.required(template, "measure")?)?;
        let n = params.count("n", DEFAULT_TOP_N)?;

        let query = AggregationQuery::new()
            .group_by(dimension)
            .measure(measure, AggFn::Sum)
            .filter(params.date_range()?);
        let mut table = self.evaluate(&query, cancel)?;

        let column = MeasureSpec::new(measure, AggFn::Sum).column_name();
        table.rows.sort_by(|a, b| {
            let va = a.get(&column).and_then(Value::as_decimal);
            let vb = b.get(&column).and_then(Value::as_decimal);
            vb.cmp(&va).then_with(|| {
                let da = a.get(dimension).and_then(Value::as_text);
                let db = b.get(dimension).and_then(Value::as_text);
                da.cmp(&db)
            })
        });
        table.rows.truncate(n);
        Ok(table)
    }

    fn series(
        &self,
        template: Template,
        bucket: TimeBucket,
        params: &TemplateParams,
        cancel: &CancelToken,
    ) -> Result<ResultTable, QueryError> {
        params.required(template.name(), "measures")?;
        let measures = self.measure_list(params, "measures")?;

        let mut query = AggregationQuery::new().bucket(bucket).filter(params.date_range()?);
        if let Some(dimension) = params.get("dimension") {
            query = query.group_by(self.check_dimension(dimension)?);
        }
        for measure in &measures {
            query = query.measure(measure, AggFn::Sum);
        }
        self.evaluate(&query, cancel)
    }

    fn totals(&self, params: &TemplateParams, cancel: &CancelToken) -> Result<ResultTable, QueryError> {
        let mut query = AggregationQuery::new().count_records().filter(params.date_range()?);
        for (measure, _) in self.schema.measures() {
            query = query.measure(measure, AggFn::Sum);
        }
        self.evaluate(&query, cancel)
    }

    /// Summed measures per dimension value, then one column per derived
    /// metric computed from those sums. A zero denominator gives null.
    fn kpi_by_dimension(&self, params: &TemplateParams, cancel: &CancelToken) -> Result<ResultTable, QueryError> {
        let template = Template::KpiByDimension.name();
        let dimension = self.check_dimension(params.required(template, "dimension")?)?;
        let metrics: Vec<&DerivedMetric> = match params.list("metrics") {
            Some(names) => names
                .iter()
                .map(|name| self.check_metric(name))
                .collect::<Result<_, _>>()?,
            None => self.schema.derived.iter().collect(),
        };

        let mut query = AggregationQuery::new()
            .group_by(dimension)
            .count_records()
            .filter(params.date_range()?);
        for (measure, _) in self.schema.measures() {
            query = query.measure(measure, AggFn::Sum);
        }
        let mut table = self.evaluate(&query, cancel)?;

        for metric in &metrics {
            table.columns.push(Column::new(metric.name.as_str(), ValueKind::Decimal));
            let numerator = MeasureSpec::new(&metric.numerator, AggFn::Sum).column_name();
            let denominator = MeasureSpec::new(&metric.denominator, AggFn::Sum).column_name();
            for row in &mut table.rows {
                let num = row.get(&numerator).and_then(Value::as_decimal);
                let den = row.get(&denominator).and_then(Value::as_decimal);
                let value = match (num, den) {
                    (Some(num), Some(den)) => metric.compute(num, den).map_or(Value::Null, Value::Decimal),
                    _ => Value::Null,
                };
                row.insert(metric.name.clone(), value);
            }
        }
        Ok(table)
    }
}
