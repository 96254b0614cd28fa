//! Core data types used across the P&L engine

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for incoming trade records.
///
/// Every variant carries the offending `trade_id` so a rejected record can be
/// reported back to the caller without losing track of which row failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("trade {trade_id}: missing required field '{field}'")]
    MissingField { trade_id: String, field: &'static str },

    #[error("trade {trade_id}: quantity ({quantity}) must be > 0")]
    NonPositiveQuantity { trade_id: String, quantity: Money },

    #[error("trade {trade_id}: price ({price}) must be > 0")]
    NonPositivePrice { trade_id: String, price: Money },

    #[error("trade {trade_id}: unknown side '{side}' (expected BUY or SELL)")]
    UnknownSide { trade_id: String, side: String },

    #[error("trade {trade_id}: '{value}' is not a valid number for '{field}'")]
    InvalidNumber {
        trade_id: String,
        field: &'static str,
        value: String,
    },

    #[error("trade {trade_id}: '{value}' is not a valid execution timestamp")]
    InvalidTimestamp { trade_id: String, value: String },

    #[error("trade {trade_id}: notional or realized P&L overflows the decimal range")]
    Overflow { trade_id: String },
}

impl ValidationError {
    pub fn trade_id(&self) -> &str {
        match self {
            Self::MissingField { trade_id, .. }
            | Self::NonPositiveQuantity { trade_id, .. }
            | Self::NonPositivePrice { trade_id, .. }
            | Self::UnknownSide { trade_id, .. }
            | Self::InvalidNumber { trade_id, .. }
            | Self::InvalidTimestamp { trade_id, .. }
            | Self::Overflow { trade_id } => trade_id,
        }
    }
}

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.trim()))
    }
}

/// Instrument symbol using Arc<str> for cheap cloning
///
/// Symbols are cloned into every enriched trade, metric and fact row.
/// Using Arc<str> instead of String keeps those clones O(1).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref().trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// Account identifier, same cheap-clone representation as [`Symbol`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

impl AccountId {
    pub fn new(s: impl AsRef<str>) -> Self {
        AccountId(std::sync::Arc::from(s.as_ref().trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    /// Case-insensitive, surrounding whitespace ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(s.to_string()),
        }
    }
}

/// (account, symbol) pair identifying a position
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    pub account_id: AccountId,
    pub symbol: Symbol,
}

impl PositionKey {
    pub fn new(account_id: AccountId, symbol: Symbol) -> Self {
        Self { account_id, symbol }
    }
}

/// Natural key of a daily metric / daily P&L fact row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub trade_date: NaiveDate,
    pub account_id: AccountId,
    pub symbol: Symbol,
}

impl MetricKey {
    pub fn new(trade_date: NaiveDate, account_id: AccountId, symbol: Symbol) -> Self {
        Self {
            trade_date,
            account_id,
            symbol,
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.trade_date, self.account_id, self.symbol)
    }
}

// ============================================================================
// Trades
// ============================================================================

/// Trade row as delivered by the ingestion feed, before validation.
///
/// Numeric and enum columns are kept as text so that a malformed value turns
/// into a [`ValidationError`] for that one trade instead of failing the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeRow {
    pub trade_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: String,
    pub price: String,
    pub execution_timestamp: String,
    pub account_id: String,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub trader_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Parse an execution timestamp, RFC 3339 first, then a naive
/// `YYYY-MM-DD HH:MM:SS` assumed to be UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    value.parse::<DateTime<Utc>>().ok().or_else(|| {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
            .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            .ok()
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TryFrom<TradeRow> for Trade {
    type Error = ValidationError;

    fn try_from(row: TradeRow) -> Result<Self, Self::Error> {
        let trade_id = row.trade_id.trim().to_string();
        let missing = |field: &'static str| ValidationError::MissingField {
            trade_id: trade_id.clone(),
            field,
        };

        if trade_id.is_empty() {
            return Err(missing("trade_id"));
        }
        if row.account_id.trim().is_empty() {
            return Err(missing("account_id"));
        }
        if row.symbol.trim().is_empty() {
            return Err(missing("symbol"));
        }

        let side = row
            .side
            .parse::<Side>()
            .map_err(|side| ValidationError::UnknownSide {
                trade_id: trade_id.clone(),
                side,
            })?;

        let parse_money = |field: &'static str, value: &str| {
            value
                .trim()
                .parse::<Money>()
                .map_err(|_| ValidationError::InvalidNumber {
                    trade_id: trade_id.clone(),
                    field,
                    value: value.to_string(),
                })
        };
        let quantity = parse_money("quantity", &row.quantity)?;
        let price = parse_money("price", &row.price)?;

        let execution_timestamp = parse_timestamp(&row.execution_timestamp).ok_or_else(|| {
            ValidationError::InvalidTimestamp {
                trade_id: trade_id.clone(),
                value: row.execution_timestamp.clone(),
            }
        })?;

        let mut trade = Trade::new(
            trade_id,
            AccountId::new(&row.account_id),
            Symbol::new(&row.symbol),
            side,
            quantity,
            price,
            execution_timestamp,
        )?;
        trade.venue = non_empty(row.venue);
        trade.trader_id = non_empty(row.trader_id);
        trade.order_id = non_empty(row.order_id);
        Ok(trade)
    }
}

/// Executed trade. Immutable once created; enrichment derives new facts from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Money,
    pub price: Money,
    pub execution_timestamp: DateTime<Utc>,
    pub venue: Option<String>,
    pub trader_id: Option<String>,
    pub order_id: Option<String>,
}

impl Trade {
    /// Create a new trade with validation
    pub fn new(
        trade_id: impl Into<String>,
        account_id: AccountId,
        symbol: Symbol,
        side: Side,
        quantity: Money,
        price: Money,
        execution_timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let trade = Self {
            trade_id: trade_id.into(),
            account_id,
            symbol,
            side,
            quantity,
            price,
            execution_timestamp,
            venue: None,
            trader_id: None,
            order_id: None,
        };
        trade.validate()?;
        Ok(trade)
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    /// Validate the trade record
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing = |field: &'static str| ValidationError::MissingField {
            trade_id: self.trade_id.clone(),
            field,
        };
        if self.trade_id.trim().is_empty() {
            return Err(missing("trade_id"));
        }
        if self.account_id.as_str().is_empty() {
            return Err(missing("account_id"));
        }
        if self.symbol.as_str().is_empty() {
            return Err(missing("symbol"));
        }

        if !self.quantity.is_positive() {
            return Err(ValidationError::NonPositiveQuantity {
                trade_id: self.trade_id.clone(),
                quantity: self.quantity,
            });
        }

        if !self.price.is_positive() {
            return Err(ValidationError::NonPositivePrice {
                trade_id: self.trade_id.clone(),
                price: self.price,
            });
        }

        Ok(())
    }

    /// Calendar date (UTC) the trade is attributed to
    pub fn execution_date(&self) -> NaiveDate {
        self.execution_timestamp.date_naive()
    }
}

/// Trade plus the position context and P&L derived for it.
///
/// Created exactly once per trade. Corrections require a new enrichment pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTrade {
    pub trade: Trade,
    pub notional_value: Money,
    /// Position quantity in the snapshot; `None` when no position existed
    pub position_quantity_before: Option<Money>,
    pub average_cost_before: Option<Money>,
    pub realized_pnl: Money,
    pub is_closing: bool,
}

impl EnrichedTrade {
    pub fn trade_date(&self) -> NaiveDate {
        self.trade.execution_date()
    }

    pub fn metric_key(&self) -> MetricKey {
        MetricKey::new(
            self.trade_date(),
            self.trade.account_id.clone(),
            self.trade.symbol.clone(),
        )
    }
}

// ============================================================================
// Positions
// ============================================================================

/// Position snapshot row as delivered by the position feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRow {
    #[serde(alias = "ACCOUNT_ID")]
    pub account_id: AccountId,
    #[serde(alias = "SYMBOL")]
    pub symbol: Symbol,
    #[serde(alias = "QUANTITY")]
    pub quantity: Money,
    #[serde(alias = "avg_cost", alias = "AVG_COST", alias = "AVERAGE_COST")]
    pub average_cost: Money,
    #[serde(default, alias = "MARKET_VALUE")]
    pub market_value: Option<Money>,
    #[serde(default, alias = "SECTOR")]
    pub sector: Option<String>,
    #[serde(default, alias = "ASSET_CLASS")]
    pub asset_class: Option<String>,
    #[serde(default, alias = "AS_OF_DATE")]
    pub as_of_date: Option<NaiveDate>,
    #[serde(default, alias = "UNREALIZED_PNL")]
    pub unrealized_pnl: Option<Money>,
}

/// A metric or fact total that no longer fits the decimal range
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{what} overflows the decimal range for {context}")]
pub struct OverflowError {
    pub what: &'static str,
    pub context: String,
}

impl OverflowError {
    pub fn new(what: &'static str, context: impl fmt::Display) -> Self {
        Self {
            what,
            context: context.to_string(),
        }
    }
}

/// Position feed rows that cannot be used as a snapshot entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("position {account_id}/{symbol}: average cost ({average_cost}) must be >= 0")]
    NegativeAverageCost {
        account_id: AccountId,
        symbol: Symbol,
        average_cost: Money,
    },

    #[error("position {account_id}/{symbol}: unrealized P&L overflows the decimal range")]
    Overflow { account_id: AccountId, symbol: Symbol },
}

impl TryFrom<PositionRow> for Position {
    type Error = PositionError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        let position = Position {
            account_id: row.account_id,
            symbol: row.symbol,
            quantity: row.quantity,
            average_cost: row.average_cost,
            market_value: row.market_value,
            sector: non_empty(row.sector),
            asset_class: non_empty(row.asset_class),
            as_of_date: row.as_of_date,
            unrealized_pnl: row.unrealized_pnl,
        };
        position.validate()?;
        Ok(position)
    }
}

/// Current holding for one account/symbol.
///
/// Owned by the external position feed; the engine only reads it.
/// `average_cost` is meaningful only when `quantity` is non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: AccountId,
    pub symbol: Symbol,
    /// Signed: positive = long, negative = short, zero = flat
    pub quantity: Money,
    pub average_cost: Money,
    pub market_value: Option<Money>,
    pub sector: Option<String>,
    pub asset_class: Option<String>,
    pub as_of_date: Option<NaiveDate>,
    /// Mark-to-market P&L when the feed supplies it directly
    pub unrealized_pnl: Option<Money>,
}

impl Position {
    pub fn new(account_id: AccountId, symbol: Symbol, quantity: Money, average_cost: Money) -> Self {
        Self {
            account_id,
            symbol,
            quantity,
            average_cost,
            market_value: None,
            sector: None,
            asset_class: None,
            as_of_date: None,
            unrealized_pnl: None,
        }
    }

    pub fn with_market_value(mut self, market_value: Money) -> Self {
        self.market_value = Some(market_value);
        self
    }

    pub fn with_unrealized_pnl(mut self, unrealized_pnl: Money) -> Self {
        self.unrealized_pnl = Some(unrealized_pnl);
        self
    }

    pub fn with_classification(
        mut self,
        sector: impl Into<String>,
        asset_class: impl Into<String>,
    ) -> Self {
        self.sector = Some(sector.into());
        self.asset_class = Some(asset_class.into());
        self
    }

    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of_date = Some(date);
        self
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.account_id.clone(), self.symbol.clone())
    }

    pub fn is_long(&self) -> bool {
        self.quantity.is_positive()
    }

    pub fn is_short(&self) -> bool {
        self.quantity.is_negative()
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Average cost, or `None` for a flat position
    pub fn open_average_cost(&self) -> Option<Money> {
        (!self.is_flat()).then_some(self.average_cost)
    }

    /// Unrealized P&L: the supplied figure, otherwise
    /// `market_value - quantity * average_cost` for an open position.
    /// `None` when it cannot be derived, including on overflow.
    pub fn unrealized_pnl(&self) -> Option<Money> {
        if self.unrealized_pnl.is_some() {
            return self.unrealized_pnl;
        }
        if self.is_flat() {
            return None;
        }
        let cost_basis = self.quantity.checked_mul(self.average_cost)?;
        self.market_value?.checked_sub(cost_basis)
    }

    /// Average cost must be non-negative, and a derived unrealized P&L must
    /// fit the decimal range.
    pub fn validate(&self) -> Result<(), PositionError> {
        if self.average_cost.is_negative() {
            return Err(PositionError::NegativeAverageCost {
                account_id: self.account_id.clone(),
                symbol: self.symbol.clone(),
                average_cost: self.average_cost,
            });
        }
        if self.market_value.is_some() && !self.is_flat() && self.unrealized_pnl().is_none() {
            return Err(PositionError::Overflow {
                account_id: self.account_id.clone(),
                symbol: self.symbol.clone(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// Per (trade_date, account, symbol) trading activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub trade_date: NaiveDate,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub buy_quantity: Money,
    pub sell_quantity: Money,
    pub net_quantity: Money,
    pub total_notional: Money,
    pub realized_pnl: Money,
    pub trade_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl DailyMetric {
    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.trade_date, self.account_id.clone(), self.symbol.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PnlStatus {
    Profit,
    Loss,
    Breakeven,
}

impl PnlStatus {
    pub fn classify(total_pnl: Money) -> Self {
        if total_pnl.is_positive() {
            PnlStatus::Profit
        } else if total_pnl.is_negative() {
            PnlStatus::Loss
        } else {
            PnlStatus::Breakeven
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PnlStatus::Profit => "PROFIT",
            PnlStatus::Loss => "LOSS",
            PnlStatus::Breakeven => "BREAKEVEN",
        }
    }
}

impl std::fmt::Display for PnlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Daily metric joined with the current position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnlFact {
    pub trade_date: NaiveDate,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub buy_quantity: Money,
    pub sell_quantity: Money,
    pub net_quantity: Money,
    pub total_notional: Money,
    pub realized_pnl: Money,
    pub trade_count: u64,
    pub current_quantity: Option<Money>,
    pub average_cost: Option<Money>,
    pub current_market_value: Option<Money>,
    pub unrealized_pnl: Option<Money>,
    pub sector: Option<String>,
    pub asset_class: Option<String>,
    pub total_pnl: Money,
    pub pnl_status: PnlStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Profitable,
    Losing,
}

impl AccountStatus {
    pub fn classify(total_pnl: Money) -> Self {
        if total_pnl >= Money::ZERO {
            AccountStatus::Profitable
        } else {
            AccountStatus::Losing
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Profitable => "PROFITABLE",
            AccountStatus::Losing => "LOSING",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Account-level rollup of daily P&L facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: AccountId,
    pub active_trading_days: usize,
    pub symbols_traded: usize,
    pub total_trades: u64,
    pub total_volume: Money,
    /// `None` when the account has no trading days
    pub avg_daily_volume: Option<Money>,
    pub total_realized_pnl: Money,
    pub total_unrealized_pnl: Money,
    pub total_pnl: Money,
    pub profitable_positions: usize,
    pub losing_positions: usize,
    /// `None` when there are no profitable or losing positions
    pub win_rate_pct: Option<f64>,
    pub best_position_pnl: Money,
    pub worst_position_pnl: Money,
    pub account_status: AccountStatus,
}

// ============================================================================
// Money Type - Precise Decimal Arithmetic for Monetary Values
// ============================================================================

use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

/// Money type for precise decimal arithmetic in monetary calculations.
///
/// Wraps `rust_decimal::Decimal` so that notional and P&L sums reconcile
/// exactly with the source records.
/// Use this type for all monetary values: prices, quantities, pnl, notional.
///
/// The operator impls panic on overflow like `Decimal`'s do; anything that
/// folds feed values uses the `checked_*` methods instead.
///
/// # Example
/// ```
/// use trade_pnl_engine::Money;
/// let price: Money = "415.00".parse().unwrap();
/// let qty = Money::from_i64(200);
/// assert_eq!(price.checked_mul(qty), Some(Money::from_i64(83_000)));
/// ```
#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    /// Zero value
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub const fn new(value: Decimal) -> Self {
        Money(value)
    }

    /// Convert to f64 (for percentage reporting)
    pub fn to_f64(self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.0.to_f64().unwrap_or(0.0)
    }

    /// Create from i64 (for whole number values)
    pub fn from_i64(value: i64) -> Self {
        Money(Decimal::from(value))
    }

    /// Get absolute value
    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    /// Check if value is zero
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Check if value is positive
    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Check if value is negative
    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Get maximum of two values
    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// Get minimum of two values
    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    /// Round to specified decimal places
    pub fn round_dp(self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        self.0.checked_mul(rhs.0).map(Money)
    }

    /// `None` on overflow and on a zero denominator
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        self.0.checked_div(rhs.0).map(Money)
    }

    /// Sum that stops with `None` at the first overflow
    pub fn checked_sum(values: impl IntoIterator<Item = Money>) -> Option<Money> {
        values
            .into_iter()
            .try_fold(Money::ZERO, |acc, value| acc.checked_add(value))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str_exact(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map(Money)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Money {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::hash::Hash for Money {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money(value)
    }
}



#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row() -> TradeRow {
        TradeRow {
            trade_id: "TRD-0001".to_string(),
            symbol: "MSFT".to_string(),
            side: "BUY".to_string(),
            quantity: "200".to_string(),
            price: "415".to_string(),
            execution_timestamp: "2024-01-15T10:30:00Z".to_string(),
            account_id: "ACCT-001".to_string(),
            venue: Some("NASDAQ".to_string()),
            trader_id: Some(String::new()),
            order_id: None,
        }
    }

    #[test]
    fn test_side_parsing_is_case_insensitive() {
        assert_eq!(" buy ".parse::<Side>(), Ok(Side::Buy));
        assert_eq!("Sell".parse::<Side>(), Ok(Side::Sell));
        assert!("HOLD".parse::<Side>().is_err());
    }

    #[test]
    fn test_trade_row_conversion() {
        let trade = Trade::try_from(row()).unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.quantity, Money::from_i64(200));
        assert_eq!(trade.venue.as_deref(), Some("NASDAQ"));
        assert_eq!(trade.trader_id, None);
        assert_eq!(
            trade.execution_date(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_trade_row_naive_timestamp() {
        let mut r = row();
        r.execution_timestamp = "2024-01-15 23:59:59".to_string();
        let trade = Trade::try_from(r).unwrap();
        assert_eq!(trade.execution_timestamp.to_rfc3339(), "2024-01-15T23:59:59+00:00");
    }

    #[test]
    fn test_trade_row_rejections() {
        let mut r = row();
        r.side = "HOLD".to_string();
        assert!(matches!(
            Trade::try_from(r),
            Err(ValidationError::UnknownSide { ref side, .. }) if side == "HOLD"
        ));

        let mut r = row();
        r.quantity = "0".to_string();
        assert!(matches!(
            Trade::try_from(r),
            Err(ValidationError::NonPositiveQuantity { .. })
        ));

        let mut r = row();
        r.price = "-1.5".to_string();
        assert!(matches!(
            Trade::try_from(r),
            Err(ValidationError::NonPositivePrice { .. })
        ));

        let mut r = row();
        r.price = "n/a".to_string();
        let err = Trade::try_from(r).unwrap_err();
        assert_eq!(err.trade_id(), "TRD-0001");
        assert!(matches!(err, ValidationError::InvalidNumber { field: "price", .. }));

        let mut r = row();
        r.execution_timestamp = "yesterday".to_string();
        assert!(matches!(
            Trade::try_from(r),
            Err(ValidationError::InvalidTimestamp { .. })
        ));

        let mut r = row();
        r.account_id = "  ".to_string();
        assert!(matches!(
            Trade::try_from(r),
            Err(ValidationError::MissingField { field: "account_id", .. })
        ));
    }

    #[test]
    fn test_position_unrealized_pnl() {
        let long = Position::new(
            AccountId::new("ACCT-001"),
            Symbol::new("AAPL"),
            Money::from_i64(100),
            Money::from_i64(180),
        )
        .with_market_value(Money::from_i64(18_500));
        assert_eq!(long.unrealized_pnl(), Some(Money::from_i64(500)));

        // short 100 @ 190 marked at 185: market value is negative
        let short = Position::new(
            AccountId::new("ACCT-001"),
            Symbol::new("TSLA"),
            Money::from_i64(-100),
            Money::from_i64(190),
        )
        .with_market_value(Money::from_i64(-18_500));
        assert_eq!(short.unrealized_pnl(), Some(Money::from_i64(500)));

        let supplied = short.clone().with_unrealized_pnl(Money::new(dec!(42.5)));
        assert_eq!(supplied.unrealized_pnl(), Some(Money::new(dec!(42.5))));

        let flat = Position::new(
            AccountId::new("ACCT-001"),
            Symbol::new("V"),
            Money::ZERO,
            Money::from_i64(275),
        )
        .with_market_value(Money::ZERO);
        assert_eq!(flat.unrealized_pnl(), None);
        assert_eq!(flat.open_average_cost(), None);
    }

    fn position_row(average_cost: Money) -> PositionRow {
        PositionRow {
            account_id: AccountId::new("ACCT-001"),
            symbol: Symbol::new("MSFT"),
            quantity: Money::from_i64(100),
            average_cost,
            market_value: Some(Money::from_i64(41_800)),
            sector: Some(" ".to_string()),
            asset_class: Some("EQUITY".to_string()),
            as_of_date: None,
            unrealized_pnl: None,
        }
    }

    #[test]
    fn test_position_row_conversion() {
        let position = Position::try_from(position_row(Money::from_i64(410))).unwrap();
        assert_eq!(position.sector, None);
        assert_eq!(position.asset_class.as_deref(), Some("EQUITY"));
        assert_eq!(position.unrealized_pnl(), Some(Money::from_i64(800)));

        // zero cost basis is allowed (e.g. granted shares)
        assert!(Position::try_from(position_row(Money::ZERO)).is_ok());
    }

    #[test]
    fn test_position_row_rejects_negative_average_cost() {
        let err = Position::try_from(position_row(Money::new(dec!(-410)))).unwrap_err();
        assert_eq!(
            err,
            PositionError::NegativeAverageCost {
                account_id: AccountId::new("ACCT-001"),
                symbol: Symbol::new("MSFT"),
                average_cost: Money::new(dec!(-410)),
            }
        );
        assert!(err.to_string().contains("ACCT-001/MSFT"));
    }

    #[test]
    fn test_position_unrealized_pnl_overflow() {
        let mut r = position_row(Money::new(Decimal::MAX));
        r.quantity = Money::from_i64(2);
        assert!(matches!(
            Position::try_from(r.clone()),
            Err(PositionError::Overflow { .. })
        ));

        // a supplied figure is used as-is, nothing to derive
        r.unrealized_pnl = Some(Money::from_i64(5));
        let position = Position::try_from(r).unwrap();
        assert_eq!(position.unrealized_pnl(), Some(Money::from_i64(5)));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(PnlStatus::classify(Money::from_i64(1)), PnlStatus::Profit);
        assert_eq!(PnlStatus::classify(Money::from_i64(-1)), PnlStatus::Loss);
        assert_eq!(PnlStatus::classify(Money::ZERO), PnlStatus::Breakeven);
        assert_eq!(AccountStatus::classify(Money::ZERO), AccountStatus::Profitable);
        assert_eq!(AccountStatus::classify(Money::from_i64(-5)), AccountStatus::Losing);
    }
}
