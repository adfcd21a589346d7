//! Typed Queries
//!
//! A [`Query`] names a provider service, an operation on that service and a
//! JSON parameter object. The request builders in this module validate their
//! arguments before producing a query, so nothing malformed is ever handed
//! to the dispatch loop.
//!
//! | Builder                      | Service         | Operation               |
//! |------------------------------|-----------------|-------------------------|
//! | [`ReferenceDataRequest`]     | `//blp/refdata` | `ReferenceDataRequest`  |
//! | [`HistoricalDataRequest`]    | `//blp/refdata` | `HistoricalDataRequest` |
//! | [`IntradayTickRequest`]      | `//blp/refdata` | `IntradayTickRequest`   |
//! | [`FieldListRequest`]         | `//blp/apiflds` | `FieldListRequest`      |
//! | [`FieldInfoRequest`]         | `//blp/apiflds` | `FieldInfoRequest`      |
//! | [`FieldSearchRequest`]       | `//blp/apiflds` | `FieldSearchRequest`    |
//! | [`AimPositionRequest`]       | `//blp/tseapi`  | `EapiRequestPosition`   |
//! | [`AimPositionHistoryRequest`]| `//blp/tsadf`   | `RequestPositionHistory`|
//! | [`AimCashBalanceRequest`]    | `//blp/tsadf`   | `RequestCashBalance`    |

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Real-time market data service used for subscriptions.
pub const MKTDATA_SERVICE: &str = "//blp/mktdata";
/// Reference data service.
pub const REFDATA_SERVICE: &str = "//blp/refdata";
/// Field metadata service.
pub const FIELDS_SERVICE: &str = "//blp/apiflds";
/// AIM real-time positions service.
pub const AIM_POSITIONS_SERVICE: &str = "//blp/tseapi";
/// AIM historical positions and cash service.
pub const AIM_HISTORY_SERVICE: &str = "//blp/tsadf";

// =============================================================================
// Errors
// =============================================================================

/// Argument validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// A list argument had no non-blank entries.
    #[error("{0} must contain at least one non-empty value")]
    EmptyList(&'static str),

    /// A scalar argument was blank.
    #[error("{0} must not be blank")]
    EmptyValue(&'static str),

    /// Start of a range was after its end.
    #[error("start {start} must be the same as or before end {end}")]
    InvalidRange {
        /// Range start.
        start: String,
        /// Range end.
        end: String,
    },

    /// Value not among the accepted set.
    #[error("{value:?} is not a valid {name}")]
    UnsupportedValue {
        /// Argument name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },

    /// Numeric argument that must be positive.
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

/// Trim every entry, drop blanks and reject an empty result.
pub(crate) fn clean_list<S: AsRef<str>>(
    name: &'static str,
    items: impl IntoIterator<Item = S>,
) -> Result<Vec<String>, QueryError> {
    let cleaned: Vec<String> = items
        .into_iter()
        .map(|item| item.as_ref().trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    if cleaned.is_empty() {
        return Err(QueryError::EmptyList(name));
    }
    Ok(cleaned)
}

fn non_blank(name: &'static str, value: &str) -> Result<String, QueryError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(QueryError::EmptyValue(name));
    }
    Ok(value.to_string())
}

fn one_of(name: &'static str, value: &str, allowed: &[&str]) -> Result<String, QueryError> {
    if allowed.contains(&value) {
        Ok(value.to_string())
    } else {
        Err(QueryError::UnsupportedValue {
            name,
            value: value.to_string(),
        })
    }
}

fn ordered<T: PartialOrd + std::fmt::Display>(start: &T, end: &T) -> Result<(), QueryError> {
    if start > end {
        return Err(QueryError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Query
// =============================================================================

/// A request addressed to a provider service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    service: String,
    operation: String,
    params: Map<String, Value>,
}

impl Query {
    /// Raw query with no parameters. Prefer the typed builders.
    #[must_use]
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            params: Map::new(),
        }
    }

    /// Set a parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Service address, e.g. `//blp/refdata`.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Operation name, e.g. `ReferenceDataRequest`.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Parameter object.
    #[must_use]
    pub const fn params(&self) -> &Map<String, Value> {
        &self.params
    }
}

// =============================================================================
// Overrides
// =============================================================================

/// Value of a field override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideValue {
    /// Free text.
    Text(String),
    /// Exact decimal.
    Decimal(Decimal),
    /// Calendar date, sent as `YYYYMMDD`.
    Date(NaiveDate),
}

impl OverrideValue {
    fn to_wire(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Decimal(value) => value.normalize().to_string(),
            Self::Date(date) => date.format("%Y%m%d").to_string(),
        }
    }
}

impl From<&str> for OverrideValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for OverrideValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Decimal> for OverrideValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<NaiveDate> for OverrideValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

#[derive(Debug, Clone, Default)]
struct Overrides(Vec<(String, OverrideValue)>);

impl Overrides {
    fn push(&mut self, field_id: impl Into<String>, value: impl Into<OverrideValue>) {
        self.0.push((field_id.into(), value.into()));
    }

    fn apply(&self, params: &mut Map<String, Value>) -> Result<(), QueryError> {
        if self.0.is_empty() {
            return Ok(());
        }
        let mut entries = Vec::with_capacity(self.0.len());
        for (field_id, value) in &self.0 {
            let field_id = non_blank("override field id", field_id)?;
            entries.push(json!({ "fieldId": field_id, "value": value.to_wire() }));
        }
        params.insert("overrides".into(), Value::Array(entries));
        Ok(())
    }
}

// =============================================================================
// Reference Data
// =============================================================================

/// Current field values for a set of securities.
#[derive(Debug, Clone)]
pub struct ReferenceDataRequest {
    securities: Vec<String>,
    fields: Vec<String>,
    overrides: Overrides,
}

impl ReferenceDataRequest {
    /// Request `fields` for `securities`.
    pub fn new<S: AsRef<str>, F: AsRef<str>>(
        securities: impl IntoIterator<Item = S>,
        fields: impl IntoIterator<Item = F>,
    ) -> Self {
        Self {
            securities: securities.into_iter().map(|s| s.as_ref().to_string()).collect(),
            fields: fields.into_iter().map(|f| f.as_ref().to_string()).collect(),
            overrides: Overrides::default(),
        }
    }

    /// Add a field override.
    #[must_use]
    pub fn override_field(
        mut self,
        field_id: impl Into<String>,
        value: impl Into<OverrideValue>,
    ) -> Self {
        self.overrides.push(field_id, value);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] when securities or fields are empty, or an
    /// override has a blank field id.
    pub fn build(self) -> Result<Query, QueryError> {
        let mut params = Map::new();
        params.insert("securities".into(), json!(clean_list("securities", self.securities)?));
        params.insert("fields".into(), json!(clean_list("fields", self.fields)?));
        self.overrides.apply(&mut params)?;
        Ok(Query {
            service: REFDATA_SERVICE.into(),
            operation: "ReferenceDataRequest".into(),
            params,
        })
    }
}

// =============================================================================
// Historical Data
// =============================================================================

/// Sampling frequency of a historical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodicitySelection {
    /// One point per day.
    Daily,
    /// One point per week.
    Weekly,
    /// One point per month.
    Monthly,
    /// One point per quarter.
    Quarterly,
    /// One point per half-year.
    SemiAnnually,
    /// One point per year.
    Yearly,
}

/// Calendar the periodicity is aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodicityAdjustment {
    /// Anchored on the end date.
    Actual,
    /// Calendar periods.
    Calendar,
    /// Fiscal periods of the security.
    Fiscal,
}

/// Which value is overridden for historical points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideOption {
    /// Use the closing value.
    OverrideOptionClose,
    /// Use the average price.
    OverrideOptionGpa,
}

/// Price or yield pricing for fixed income.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingOption {
    /// Price.
    PricingOptionPrice,
    /// Yield.
    PricingOptionYield,
}

/// Which non-trading days are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NonTradingDayFillOption {
    /// All weekdays.
    NonTradingWeekdays,
    /// Every calendar day.
    AllCalendarDays,
    /// Only days with activity.
    ActiveDaysOnly,
}

/// How non-trading days are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NonTradingDayFillMethod {
    /// Repeat the previous value.
    PreviousValue,
    /// Leave empty.
    NilValue,
}

/// Boolean switches of a historical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoricalFlag {
    /// Return entitlement ids.
    ReturnEids,
    /// Return relative dates.
    ReturnRelativeDate,
    /// Adjust for normal cash distributions.
    AdjustmentNormal,
    /// Adjust for abnormal cash distributions.
    AdjustmentAbnormal,
    /// Adjust for splits.
    AdjustmentSplit,
    /// Follow the terminal's DPDF defaults.
    AdjustmentFollowDpdf,
}

impl HistoricalFlag {
    const fn wire_name(self) -> &'static str {
        match self {
            Self::ReturnEids => "returnEids",
            Self::ReturnRelativeDate => "returnRelativeDate",
            Self::AdjustmentNormal => "adjustmentNormal",
            Self::AdjustmentAbnormal => "adjustmentAbnormal",
            Self::AdjustmentSplit => "adjustmentSplit",
            Self::AdjustmentFollowDpdf => "adjustmentFollowDPDF",
        }
    }
}

/// Time series of field values between two dates.
#[derive(Debug, Clone)]
pub struct HistoricalDataRequest {
    securities: Vec<String>,
    fields: Vec<String>,
    start: NaiveDate,
    end: NaiveDate,
    overrides: Overrides,
    options: Map<String, Value>,
    currency: Option<String>,
    calendar_code: Option<String>,
    max_data_points: Option<u32>,
}

impl HistoricalDataRequest {
    /// Request `fields` for `securities` over `start..=end`.
    pub fn new<S: AsRef<str>, F: AsRef<str>>(
        securities: impl IntoIterator<Item = S>,
        fields: impl IntoIterator<Item = F>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            securities: securities.into_iter().map(|s| s.as_ref().to_string()).collect(),
            fields: fields.into_iter().map(|f| f.as_ref().to_string()).collect(),
            start,
            end,
            overrides: Overrides::default(),
            options: Map::new(),
            currency: None,
            calendar_code: None,
            max_data_points: None,
        }
    }

    fn option(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.options.insert(key.to_string(), value);
        }
        self
    }

    /// Sampling frequency.
    #[must_use]
    pub fn periodicity(self, selection: PeriodicitySelection) -> Self {
        self.option("periodicitySelection", selection)
    }

    /// Period alignment.
    #[must_use]
    pub fn periodicity_adjustment(self, adjustment: PeriodicityAdjustment) -> Self {
        self.option("periodicityAdjustment", adjustment)
    }

    /// Override option.
    #[must_use]
    pub fn override_option(self, option: OverrideOption) -> Self {
        self.option("overrideOption", option)
    }

    /// Pricing option.
    #[must_use]
    pub fn pricing_option(self, option: PricingOption) -> Self {
        self.option("pricingOption", option)
    }

    /// Non-trading day fill option.
    #[must_use]
    pub fn fill_option(self, option: NonTradingDayFillOption) -> Self {
        self.option("nonTradingDayFillOption", option)
    }

    /// Non-trading day fill method.
    #[must_use]
    pub fn fill_method(self, method: NonTradingDayFillMethod) -> Self {
        self.option("nonTradingDayFillMethod", method)
    }

    /// Set a boolean switch.
    #[must_use]
    pub fn flag(self, flag: HistoricalFlag, enabled: bool) -> Self {
        self.option(flag.wire_name(), enabled)
    }

    /// Report values in this currency.
    #[must_use]
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Calendar code override.
    #[must_use]
    pub fn calendar_code(mut self, code: impl Into<String>) -> Self {
        self.calendar_code = Some(code.into());
        self
    }

    /// Cap on returned points per security.
    #[must_use]
    pub const fn max_data_points(mut self, points: u32) -> Self {
        self.max_data_points = Some(points);
        self
    }

    /// Add a field override.
    #[must_use]
    pub fn override_field(
        mut self,
        field_id: impl Into<String>,
        value: impl Into<OverrideValue>,
    ) -> Self {
        self.overrides.push(field_id, value);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for empty lists, `start > end`, a blank
    /// currency or calendar code, or `max_data_points == 0`.
    pub fn build(self) -> Result<Query, QueryError> {
        ordered(&self.start, &self.end)?;
        let mut params = self.options;
        params.insert("securities".into(), json!(clean_list("securities", self.securities)?));
        params.insert("fields".into(), json!(clean_list("fields", self.fields)?));
        params.insert("startDate".into(), json!(self.start.format("%Y%m%d").to_string()));
        params.insert("endDate".into(), json!(self.end.format("%Y%m%d").to_string()));
        if let Some(currency) = self.currency {
            params.insert("currency".into(), json!(non_blank("currency", &currency)?));
        }
        if let Some(code) = self.calendar_code {
            params.insert(
                "calendarCodeOverride".into(),
                json!(non_blank("calendar code", &code)?),
            );
        }
        match self.max_data_points {
            Some(0) => return Err(QueryError::NotPositive("max data points")),
            Some(points) => {
                params.insert("maxDataPoints".into(), json!(points));
            }
            None => {}
        }
        self.overrides.apply(&mut params)?;
        Ok(Query {
            service: REFDATA_SERVICE.into(),
            operation: "HistoricalDataRequest".into(),
            params,
        })
    }
}

// =============================================================================
// Intraday Ticks
// =============================================================================

/// Tick event types accepted by an intraday tick request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickEventType {
    /// Trades.
    Trade,
    /// Bids.
    Bid,
    /// Asks.
    Ask,
    /// Best bids.
    BidBest,
    /// Best asks.
    AskBest,
    /// Bid yields.
    BidYield,
    /// Ask yields.
    AskYield,
    /// Mid prices.
    MidPrice,
    /// At-trade quotes.
    AtTrade,
    /// Best bid quotes.
    BestBid,
    /// Best ask quotes.
    BestAsk,
    /// Settlement prices.
    Settle,
}

/// Optional columns and adjustments of an intraday tick request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickOption {
    /// Condition codes.
    ConditionCodes,
    /// Non-plottable events.
    NonPlottableEvents,
    /// Exchange codes.
    ExchangeCodes,
    /// Entitlement ids.
    ReturnEids,
    /// Broker codes.
    BrokerCodes,
    /// RPS codes.
    RpsCodes,
    /// BIC and MIC codes.
    BicMicCodes,
    /// Forced delay.
    ForcedDelay,
    /// Spread price.
    SpreadPrice,
    /// Yield.
    Yield,
    /// Action codes.
    ActionCodes,
    /// Indicator codes.
    IndicatorCodes,
    /// Trade time.
    TradeTime,
    /// Upfront price.
    UpfrontPrice,
    /// Equity reference price.
    EqRefPrice,
    /// Adjust for normal distributions.
    AdjustmentNormal,
    /// Adjust for abnormal distributions.
    AdjustmentAbnormal,
    /// Adjust for splits.
    AdjustmentSplit,
    /// Follow DPDF defaults.
    AdjustmentFollowDpdf,
    /// Client-specific fields.
    ClientSpecificFields,
    /// Trade ids.
    TradeId,
}

impl TickOption {
    const ALL: [Self; 21] = [
        Self::ConditionCodes,
        Self::NonPlottableEvents,
        Self::ExchangeCodes,
        Self::ReturnEids,
        Self::BrokerCodes,
        Self::RpsCodes,
        Self::BicMicCodes,
        Self::ForcedDelay,
        Self::SpreadPrice,
        Self::Yield,
        Self::ActionCodes,
        Self::IndicatorCodes,
        Self::TradeTime,
        Self::UpfrontPrice,
        Self::EqRefPrice,
        Self::AdjustmentNormal,
        Self::AdjustmentAbnormal,
        Self::AdjustmentSplit,
        Self::AdjustmentFollowDpdf,
        Self::ClientSpecificFields,
        Self::TradeId,
    ];

    const fn wire_name(self) -> &'static str {
        match self {
            Self::ConditionCodes => "includeConditionCodes",
            Self::NonPlottableEvents => "includeNonPlottableEvents",
            Self::ExchangeCodes => "includeExchangeCodes",
            Self::ReturnEids => "returnEids",
            Self::BrokerCodes => "includeBrokerCodes",
            Self::RpsCodes => "includeRpsCodes",
            Self::BicMicCodes => "includeBicMicCodes",
            Self::ForcedDelay => "forcedDelay",
            Self::SpreadPrice => "includeSpreadPrice",
            Self::Yield => "includeYield",
            Self::ActionCodes => "includeActionCodes",
            Self::IndicatorCodes => "includeIndicatorCodes",
            Self::TradeTime => "includeTradeTime",
            Self::UpfrontPrice => "includeUpfrontPrice",
            Self::EqRefPrice => "includeEqRefPrice",
            Self::AdjustmentNormal => "adjustmentNormal",
            Self::AdjustmentAbnormal => "adjustmentAbnormal",
            Self::AdjustmentSplit => "adjustmentSplit",
            Self::AdjustmentFollowDpdf => "adjustmentFollowDPDF",
            Self::ClientSpecificFields => "includeClientSpecificFields",
            Self::TradeId => "includeTradeId",
        }
    }
}

/// Raw ticks for one security between two UTC instants.
#[derive(Debug, Clone)]
pub struct IntradayTickRequest {
    security: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    event_types: Vec<TickEventType>,
    enabled: Vec<TickOption>,
}

impl IntradayTickRequest {
    /// Request `event_types` ticks for `security`. Trade time is included by
    /// default; every other option starts disabled.
    pub fn new(
        security: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        event_types: impl IntoIterator<Item = TickEventType>,
    ) -> Self {
        Self {
            security: security.into(),
            start,
            end,
            event_types: event_types.into_iter().collect(),
            enabled: vec![TickOption::TradeTime],
        }
    }

    /// Enable or disable an option.
    #[must_use]
    pub fn option(mut self, option: TickOption, enabled: bool) -> Self {
        self.enabled.retain(|o| *o != option);
        if enabled {
            self.enabled.push(option);
        }
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for a blank security, no event types or
    /// `start > end`.
    pub fn build(self) -> Result<Query, QueryError> {
        let security = non_blank("security", &self.security)?;
        if self.event_types.is_empty() {
            return Err(QueryError::EmptyList("event types"));
        }
        ordered(&self.start, &self.end)?;

        let mut event_types = self.event_types;
        let mut seen = std::collections::HashSet::new();
        event_types.retain(|event| seen.insert(*event));

        let mut params = Map::new();
        params.insert("security".into(), json!(security));
        params.insert(
            "startDateTime".into(),
            json!(self.start.format("%Y-%m-%dT%H:%M:%S").to_string()),
        );
        params.insert(
            "endDateTime".into(),
            json!(self.end.format("%Y-%m-%dT%H:%M:%S").to_string()),
        );
        params.insert("eventTypes".into(), json!(event_types));
        for option in TickOption::ALL {
            params.insert(
                option.wire_name().into(),
                json!(self.enabled.contains(&option)),
            );
        }
        Ok(Query {
            service: REFDATA_SERVICE.into(),
            operation: "IntradayTickRequest".into(),
            params,
        })
    }
}

// =============================================================================
// Field Metadata
// =============================================================================

/// Field category filter for field lists and searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// All fields.
    All,
    /// Static reference fields.
    Static,
    /// Real-time fields.
    RealTime,
}

/// Every field of a given type.
#[derive(Debug, Clone)]
pub struct FieldListRequest {
    field_type: FieldType,
    documentation: bool,
}

impl FieldListRequest {
    /// List fields of `field_type`, with documentation.
    #[must_use]
    pub const fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            documentation: true,
        }
    }

    /// Whether to return field documentation.
    #[must_use]
    pub const fn documentation(mut self, enabled: bool) -> Self {
        self.documentation = enabled;
        self
    }

    /// Build. Field list requests have no failure modes.
    #[must_use]
    pub fn build(self) -> Query {
        Query::new(FIELDS_SERVICE, "FieldListRequest")
            .param("fieldType", json!(self.field_type))
            .param("returnFieldDocumentation", self.documentation)
    }
}

/// Metadata for specific field mnemonics or ids.
#[derive(Debug, Clone)]
pub struct FieldInfoRequest {
    ids: Vec<String>,
    documentation: bool,
    overridable: bool,
}

impl FieldInfoRequest {
    /// Describe `ids`.
    pub fn new<S: AsRef<str>>(ids: impl IntoIterator<Item = S>) -> Self {
        Self {
            ids: ids.into_iter().map(|id| id.as_ref().to_string()).collect(),
            documentation: true,
            overridable: false,
        }
    }

    /// Whether to return field documentation.
    #[must_use]
    pub const fn documentation(mut self, enabled: bool) -> Self {
        self.documentation = enabled;
        self
    }

    /// Whether to report if each field is overridable.
    #[must_use]
    pub const fn include_overridable(mut self, enabled: bool) -> Self {
        self.overridable = enabled;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::EmptyList`] when no id is given.
    pub fn build(self) -> Result<Query, QueryError> {
        let mut query = Query::new(FIELDS_SERVICE, "FieldInfoRequest")
            .param("id", json!(clean_list("field ids", self.ids)?))
            .param("returnFieldDocumentation", self.documentation);
        if self.overridable {
            query = query.param("properties", json!(["fieldoverridable"]));
        }
        Ok(query)
    }
}

const PRODUCT_TYPES: &[&str] = &[
    "All", "Govt", "Corp", "Mtge", "M-Mkt", "Muni", "Pfd", "Equity", "Cmdty", "Index", "Curncy",
];
const BPS_REQUIREMENTS: &[&str] = &["All", "BPS", "NoBPS"];
const CATEGORIES: &[&str] = &[
    "New Fields",
    "Analysis",
    "Corporate Actions",
    "Custom Fields",
    "Descriptive",
    "Earnings",
    "Estimates",
    "Fundamentals",
    "Market Activity",
    "Metadata",
    "Ratings",
    "Trading Systems",
];

/// Include or exclude condition of a field search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCondition {
    /// Product type, e.g. `Equity`.
    ProductType(String),
    /// Field type.
    FieldType(FieldType),
    /// Licence requirement: `All`, `BPS` or `NoBPS`.
    BpsRequirement(String),
    /// Category, e.g. `Fundamentals`.
    Category(String),
}

impl SearchCondition {
    fn wire(&self) -> Result<(&'static str, Value), QueryError> {
        Ok(match self {
            Self::ProductType(value) => {
                ("productType", json!(one_of("product type", value, PRODUCT_TYPES)?))
            }
            Self::FieldType(value) => ("fieldType", json!(value)),
            Self::BpsRequirement(value) => (
                "bpsRequirement",
                json!(one_of("bps requirement", value, BPS_REQUIREMENTS)?),
            ),
            Self::Category(value) => ("category", json!(one_of("category", value, CATEGORIES)?)),
        })
    }
}

fn conditions_object(conditions: &[SearchCondition]) -> Result<Value, QueryError> {
    let mut object: Map<String, Value> = Map::new();
    for condition in conditions {
        let (key, value) = condition.wire()?;
        let slot = object
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = slot {
            values.push(value);
        }
    }
    Ok(Value::Object(object))
}

/// Keyword search over field mnemonics, descriptions and definitions.
#[derive(Debug, Clone)]
pub struct FieldSearchRequest {
    search_spec: String,
    include: Vec<SearchCondition>,
    exclude: Vec<SearchCondition>,
    documentation: bool,
}

impl FieldSearchRequest {
    /// Search for `search_spec`.
    pub fn new(search_spec: impl Into<String>) -> Self {
        Self {
            search_spec: search_spec.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            documentation: true,
        }
    }

    /// Keep only fields matching `condition`.
    #[must_use]
    pub fn include(mut self, condition: SearchCondition) -> Self {
        self.include.push(condition);
        self
    }

    /// Drop fields matching `condition`.
    #[must_use]
    pub fn exclude(mut self, condition: SearchCondition) -> Self {
        self.exclude.push(condition);
        self
    }

    /// Whether to return field documentation.
    #[must_use]
    pub const fn documentation(mut self, enabled: bool) -> Self {
        self.documentation = enabled;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for a blank search or a condition value that
    /// is not recognised.
    pub fn build(self) -> Result<Query, QueryError> {
        let mut query = Query::new(FIELDS_SERVICE, "FieldSearchRequest")
            .param("searchSpec", non_blank("search spec", &self.search_spec)?)
            .param("returnFieldDocumentation", self.documentation);
        if !self.include.is_empty() {
            query = query.param("include", conditions_object(&self.include)?);
        }
        if !self.exclude.is_empty() {
            query = query.param("exclude", conditions_object(&self.exclude)?);
        }
        Ok(query)
    }
}

// =============================================================================
// AIM Positions and Cash
// =============================================================================

/// Whether an AIM entity names a single account or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// Single account.
    Account,
    /// Account group.
    Group,
}

fn entity_params(
    account: &str,
    entity_type: EntityType,
) -> Result<Map<String, Value>, QueryError> {
    let mut params = Map::new();
    params.insert("entityType".into(), json!(entity_type));
    params.insert("entityName".into(), json!(non_blank("account", account)?));
    Ok(params)
}

fn include_cash(params: &mut Map<String, Value>) {
    params.insert(
        "internalParameters".into(),
        json!([{ "name": "IncludeCash", "value": "Y" }]),
    );
}

/// Current positions of an AIM account or group.
#[derive(Debug, Clone)]
pub struct AimPositionRequest {
    account: String,
    entity_type: EntityType,
    fields: Vec<String>,
    include_cash: bool,
}

impl AimPositionRequest {
    /// Positions of `account` with extra `fields`. `ACCOUNT`, `TICKER` and
    /// `NAME` are always requested.
    pub fn new<S: AsRef<str>>(
        account: impl Into<String>,
        entity_type: EntityType,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            account: account.into(),
            entity_type,
            fields: fields.into_iter().map(|f| f.as_ref().to_string()).collect(),
            include_cash: true,
        }
    }

    /// Whether cash positions are included.
    #[must_use]
    pub const fn include_cash(mut self, enabled: bool) -> Self {
        self.include_cash = enabled;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::EmptyValue`] for a blank account.
    pub fn build(self) -> Result<Query, QueryError> {
        let mut params = entity_params(&self.account, self.entity_type)?;
        let fields = ["ACCOUNT", "TICKER", "NAME"]
            .into_iter()
            .map(String::from)
            .chain(self.fields);
        params.insert("fields".into(), json!(clean_list("fields", fields)?));
        if self.include_cash {
            include_cash(&mut params);
        }
        Ok(Query {
            service: AIM_POSITIONS_SERVICE.into(),
            operation: "EapiRequestPosition".into(),
            params,
        })
    }
}

/// Saved positions of an AIM account or group between two dates.
#[derive(Debug, Clone)]
pub struct AimPositionHistoryRequest {
    account: String,
    entity_type: EntityType,
    fields: Vec<String>,
    start: NaiveDate,
    end: NaiveDate,
    include_cash: bool,
}

impl AimPositionHistoryRequest {
    /// Position history of `account`. `DATE`, `ACCOUNT`, `TICKER` and
    /// `NAME` are always requested.
    pub fn new<S: AsRef<str>>(
        account: impl Into<String>,
        entity_type: EntityType,
        fields: impl IntoIterator<Item = S>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            account: account.into(),
            entity_type,
            fields: fields.into_iter().map(|f| f.as_ref().to_string()).collect(),
            start,
            end,
            include_cash: true,
        }
    }

    /// Whether cash positions are included.
    #[must_use]
    pub const fn include_cash(mut self, enabled: bool) -> Self {
        self.include_cash = enabled;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for a blank account or `start > end`.
    pub fn build(self) -> Result<Query, QueryError> {
        ordered(&self.start, &self.end)?;
        let mut params = entity_params(&self.account, self.entity_type)?;
        let fields = ["DATE", "ACCOUNT", "TICKER", "NAME"]
            .into_iter()
            .map(String::from)
            .chain(self.fields);
        params.insert("fields".into(), json!(clean_list("fields", fields)?));
        params.insert(
            "dateRange".into(),
            json!({
                "fromDate": self.start.format("%Y-%m-%d").to_string(),
                "toDate": self.end.format("%Y-%m-%d").to_string(),
            }),
        );
        if self.include_cash {
            include_cash(&mut params);
        }
        Ok(Query {
            service: AIM_HISTORY_SERVICE.into(),
            operation: "RequestPositionHistory".into(),
            params,
        })
    }
}

/// Cash balances of an AIM account or group.
#[derive(Debug, Clone)]
pub struct AimCashBalanceRequest {
    account: String,
    entity_type: EntityType,
    amount_types: Vec<String>,
    currencies: Vec<String>,
}

impl AimCashBalanceRequest {
    /// Cash balances of `account`.
    pub fn new(account: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            account: account.into(),
            entity_type,
            amount_types: Vec::new(),
            currencies: Vec::new(),
        }
    }

    /// Restrict to these amount types.
    #[must_use]
    pub fn amount_types<S: AsRef<str>>(mut self, types: impl IntoIterator<Item = S>) -> Self {
        self.amount_types = types.into_iter().map(|t| t.as_ref().to_string()).collect();
        self
    }

    /// Restrict to these currencies.
    #[must_use]
    pub fn currencies<S: AsRef<str>>(mut self, currencies: impl IntoIterator<Item = S>) -> Self {
        self.currencies = currencies
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect();
        self
    }

    /// Validate and build. Empty filters are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::EmptyValue`] for a blank account.
    pub fn build(self) -> Result<Query, QueryError> {
        let mut params = entity_params(&self.account, self.entity_type)?;
        if let Ok(types) = clean_list("amount types", self.amount_types) {
            params.insert("amountType".into(), json!(types));
        }
        if let Ok(currencies) = clean_list("currencies", self.currencies) {
            params.insert("currencyCode".into(), json!(currencies));
        }
        Ok(Query {
            service: AIM_HISTORY_SERVICE.into(),
            operation: "RequestCashBalance".into(),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn reference_data_filters_blank_entries() {
        let query = ReferenceDataRequest::new(["IBM US Equity", "", " "], ["PX_LAST"])
            .build()
            .unwrap();

        assert_eq!(query.service(), REFDATA_SERVICE);
        assert_eq!(query.operation(), "ReferenceDataRequest");
        assert_eq!(query.params()["securities"], json!(["IBM US Equity"]));
        assert_eq!(query.params()["fields"], json!(["PX_LAST"]));
        assert!(!query.params().contains_key("overrides"));
    }

    #[test_case(&[], &["PX_LAST"], "securities" ; "no securities")]
    #[test_case(&["IBM US Equity"], &[""], "fields" ; "blank fields")]
    fn reference_data_rejects_empty_lists(
        securities: &[&str],
        fields: &[&str],
        name: &'static str,
    ) {
        let err = ReferenceDataRequest::new(securities, fields)
            .build()
            .unwrap_err();
        assert_eq!(err, QueryError::EmptyList(name));
    }

    #[test]
    fn overrides_serialize_as_field_value_pairs() {
        let query = ReferenceDataRequest::new(["AAPL US Equity"], ["BEST_EPS"])
            .override_field("BEST_FPERIOD_OVERRIDE", "1BF")
            .override_field("EQY_FUND_CRNCY", "USD")
            .override_field("SCALE", Decimal::new(1500, 3))
            .override_field("END_DATE_OVERRIDE", date(2024, 3, 31))
            .build()
            .unwrap();

        assert_eq!(
            query.params()["overrides"],
            json!([
                {"fieldId": "BEST_FPERIOD_OVERRIDE", "value": "1BF"},
                {"fieldId": "EQY_FUND_CRNCY", "value": "USD"},
                {"fieldId": "SCALE", "value": "1.5"},
                {"fieldId": "END_DATE_OVERRIDE", "value": "20240331"},
            ])
        );
    }

    #[test]
    fn historical_formats_dates_and_options() {
        let query = HistoricalDataRequest::new(
            ["SPX Index"],
            ["PX_LAST"],
            date(2024, 1, 2),
            date(2024, 6, 28),
        )
        .periodicity(PeriodicitySelection::SemiAnnually)
        .periodicity_adjustment(PeriodicityAdjustment::Calendar)
        .fill_option(NonTradingDayFillOption::AllCalendarDays)
        .fill_method(NonTradingDayFillMethod::PreviousValue)
        .flag(HistoricalFlag::AdjustmentSplit, true)
        .currency("EUR")
        .max_data_points(100)
        .build()
        .unwrap();

        let params = query.params();
        assert_eq!(params["startDate"], json!("20240102"));
        assert_eq!(params["endDate"], json!("20240628"));
        assert_eq!(params["periodicitySelection"], json!("SEMI_ANNUALLY"));
        assert_eq!(params["periodicityAdjustment"], json!("CALENDAR"));
        assert_eq!(params["nonTradingDayFillOption"], json!("ALL_CALENDAR_DAYS"));
        assert_eq!(params["nonTradingDayFillMethod"], json!("PREVIOUS_VALUE"));
        assert_eq!(params["adjustmentSplit"], json!(true));
        assert_eq!(params["currency"], json!("EUR"));
        assert_eq!(params["maxDataPoints"], json!(100));
    }

    #[test]
    fn historical_same_day_range_is_valid() {
        let day = date(2024, 5, 1);
        assert!(HistoricalDataRequest::new(["X"], ["Y"], day, day).build().is_ok());
    }

    #[test]
    fn historical_rejects_inverted_range() {
        let err = HistoricalDataRequest::new(["X"], ["Y"], date(2024, 2, 1), date(2024, 1, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidRange { .. }));
    }

    #[test]
    fn historical_rejects_zero_points() {
        let err = HistoricalDataRequest::new(["X"], ["Y"], date(2024, 1, 1), date(2024, 1, 2))
            .max_data_points(0)
            .build()
            .unwrap_err();
        assert_eq!(err, QueryError::NotPositive("max data points"));
    }

    #[test]
    fn intraday_defaults_and_event_types() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
        let query = IntradayTickRequest::new(
            "IBM US Equity",
            start,
            end,
            [TickEventType::Trade, TickEventType::BidBest, TickEventType::Trade],
        )
        .option(TickOption::ConditionCodes, true)
        .option(TickOption::TradeTime, false)
        .build()
        .unwrap();

        let params = query.params();
        assert_eq!(params["eventTypes"], json!(["TRADE", "BID_BEST"]));
        assert_eq!(params["startDateTime"], json!("2024-03-01T14:30:00"));
        assert_eq!(params["includeConditionCodes"], json!(true));
        assert_eq!(params["includeTradeTime"], json!(false));
        assert_eq!(params["adjustmentFollowDPDF"], json!(false));
    }

    #[test]
    fn intraday_requires_event_types() {
        let now = Utc::now();
        let err = IntradayTickRequest::new("IBM US Equity", now, now, [])
            .build()
            .unwrap_err();
        assert_eq!(err, QueryError::EmptyList("event types"));
    }

    #[test]
    fn field_list_type_wire_names() {
        let query = FieldListRequest::new(FieldType::RealTime).documentation(false).build();
        assert_eq!(query.service(), FIELDS_SERVICE);
        assert_eq!(query.params()["fieldType"], json!("RealTime"));
        assert_eq!(query.params()["returnFieldDocumentation"], json!(false));
    }

    #[test]
    fn field_info_overridable_property() {
        let query = FieldInfoRequest::new(["PX_LAST", "NAME"])
            .include_overridable(true)
            .build()
            .unwrap();
        assert_eq!(query.params()["id"], json!(["PX_LAST", "NAME"]));
        assert_eq!(query.params()["properties"], json!(["fieldoverridable"]));
    }

    #[test]
    fn field_search_groups_conditions() {
        let query = FieldSearchRequest::new("last price")
            .include(SearchCondition::ProductType("Equity".into()))
            .include(SearchCondition::ProductType("Index".into()))
            .exclude(SearchCondition::FieldType(FieldType::Static))
            .build()
            .unwrap();
        assert_eq!(
            query.params()["include"],
            json!({"productType": ["Equity", "Index"]})
        );
        assert_eq!(query.params()["exclude"], json!({"fieldType": ["Static"]}));
    }

    #[test_case(SearchCondition::ProductType("Stocks".into()) ; "product type")]
    #[test_case(SearchCondition::BpsRequirement("Maybe".into()) ; "bps")]
    #[test_case(SearchCondition::Category("Gossip".into()) ; "category")]
    fn field_search_rejects_unknown_values(condition: SearchCondition) {
        let err = FieldSearchRequest::new("price")
            .include(condition)
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedValue { .. }));
    }

    #[test]
    fn aim_positions_prepend_default_fields() {
        let query = AimPositionRequest::new("FUND-A", EntityType::Group, ["POSITION", ""])
            .build()
            .unwrap();
        assert_eq!(query.service(), AIM_POSITIONS_SERVICE);
        assert_eq!(query.params()["entityType"], json!("GROUP"));
        assert_eq!(
            query.params()["fields"],
            json!(["ACCOUNT", "TICKER", "NAME", "POSITION"])
        );
        assert_eq!(
            query.params()["internalParameters"],
            json!([{"name": "IncludeCash", "value": "Y"}])
        );
    }

    #[test]
    fn aim_history_date_range() {
        let query = AimPositionHistoryRequest::new(
            "FUND-A",
            EntityType::Account,
            Vec::<String>::new(),
            date(2024, 1, 1),
            date(2024, 1, 31),
        )
        .include_cash(false)
        .build()
        .unwrap();
        assert_eq!(query.operation(), "RequestPositionHistory");
        assert_eq!(
            query.params()["dateRange"],
            json!({"fromDate": "2024-01-01", "toDate": "2024-01-31"})
        );
        assert!(!query.params().contains_key("internalParameters"));
    }

    #[test]
    fn aim_cash_omits_empty_filters() {
        let query = AimCashBalanceRequest::new("FUND-A", EntityType::Account)
            .currencies(["USD", "JPY"])
            .build()
            .unwrap();
        assert_eq!(query.params()["currencyCode"], json!(["USD", "JPY"]));
        assert!(!query.params().contains_key("amountType"));
    }

    #[test]
    fn aim_rejects_blank_account() {
        let err = AimCashBalanceRequest::new("  ", EntityType::Account)
            .build()
            .unwrap_err();
        assert_eq!(err, QueryError::EmptyValue("account"));
    }
}
