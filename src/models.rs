//! Payloads of the connector's commands.
//!
//! Field names follow the Lua connector verbatim, including its mix of
//! `snake_case`, `camelCase` and the upper-case transaction table keys.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration, Month, PrimitiveDateTime, Time, UtcOffset};

use crate::error::{Error, Result};

const CANDLE_TIMESTAMP: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
);

/// Identifies a candle data source (`createDataSource` / `closeDataSource`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceRequest {
    pub ticker: String,
    pub interval: i32,
    #[serde(rename = "class_code")]
    pub class: String,
}

pub type CreateDataSourceRequest = DataSourceRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCandlesRequest {
    #[serde(rename = "class_code")]
    pub class: String,
    pub ticker: String,
    pub interval: i32,
    pub count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOrderBookRequest {
    pub class_code: String,
    pub sec_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPortfolioRequest {
    pub client_code: String,
    pub firm_id: String,
}

/// Transaction table passed to `sendTransaction`.
///
/// `ACTION` selects the operation (`NEW_ORDER`, `KILL_ORDER`,
/// `NEW_STOP_ORDER`, `KILL_STOP_ORDER`); `TYPE` is `L` for limit or `M` for
/// market orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CreateOrderRequest {
    #[serde(rename = "CLASSCODE")]
    pub class_code: String,
    #[serde(rename = "SECCODE")]
    pub sec_code: String,
    pub account: String,
    pub trans_id: String,
    pub operation: String,
    pub price: String,
    pub quantity: String,
    pub action: String,
    #[serde(rename = "TYPE")]
    pub order_type: String,
    #[serde(rename = "STOPPRICE", default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    /// `GTC` keeps the order until cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOrderByNumberRequest {
    pub class_code: String,
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOrderByIdRequest {
    pub class_code: String,
    pub sec_code: String,
    pub trans_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStopOrderByTickerRequest {
    pub class_code: String,
    pub sec_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoneyLimits {
    pub client_code: String,
    pub currentbal: f64,
    pub currentlimit: f64,
    pub firmid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    pub firmid: String,
    pub trdaccid: String,
    pub main_trdaccid: String,
    pub trdacc_type: i32,
    pub description: String,
}

/// Broken-down timestamp as the terminal reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuikTime {
    pub count: i32,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub month: u8,
    pub ms: u16,
    pub sec: u8,
    pub week_day: i32,
    pub year: i32,
}

impl QuikTime {
    /// Builds the wall-clock time, carrying out-of-range fields into the next
    /// unit: month 13 is January of the next year, February 30 is March 1 or
    /// 2, day 0 is the last day of the previous month, hour 24 is midnight of
    /// the next day.
    pub fn to_datetime(&self) -> Result<PrimitiveDateTime> {
        let invalid =
            |e: &dyn std::fmt::Display| Error::InvalidTimestamp(format!("{:?}: {}", self, e));

        let months = i32::from(self.month) - 1;
        let year = self.year + months.div_euclid(12);
        let month = Month::try_from((months.rem_euclid(12) + 1) as u8).map_err(|e| invalid(&e))?;
        let first = Date::from_calendar_date(year, month, 1).map_err(|e| invalid(&e))?;

        let offset = Duration::days(i64::from(self.day) - 1)
            + Duration::hours(i64::from(self.hour))
            + Duration::minutes(i64::from(self.min))
            + Duration::seconds(i64::from(self.sec))
            + Duration::milliseconds(i64::from(self.ms));
        PrimitiveDateTime::new(first, Time::MIDNIGHT)
            .checked_add(offset)
            .ok_or_else(|| invalid(&"out of range"))
    }

    /// Renders the time as RFC 3339 with second precision in `offset`.
    pub fn to_rfc3339(&self, offset: UtcOffset) -> Result<String> {
        self.to_datetime()?
            .assume_offset(offset)
            .format(CANDLE_TIMESTAMP)
            .map_err(|e| Error::InvalidTimestamp(format!("{:?}: {}", self, e)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuikCandle {
    pub time: QuikTime,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: String,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
}

impl QuikCandle {
    pub fn to_candle(&self, offset: UtcOffset) -> Result<Candle> {
        Ok(Candle {
            timestamp: self.time.to_rfc3339(offset)?,
            open: self.open,
            close: self.close,
            high: self.high,
            low: self.low,
            volume: self.volume as i64,
        })
    }
}

/// Sequential `TRANS_ID` source, shareable between tasks.
#[derive(Debug)]
pub struct TransactionIds {
    next: AtomicU64,
}

impl TransactionIds {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

impl Default for TransactionIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
