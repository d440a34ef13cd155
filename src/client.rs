//! Typed commands over a [`Session`].

use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::net::ToSocketAddrs;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::models::{
    Account, Candle, CreateDataSourceRequest, CreateOrderRequest, DataSourceRequest,
    GetCandlesRequest, GetOrderByIdRequest, GetOrderByNumberRequest, GetPortfolioRequest,
    GetStopOrderByTickerRequest, MoneyLimits, QuikCandle, SubscribeOrderBookRequest,
};
use crate::protocol::CommandResult;
use crate::session::Session;

pub mod commands {
    pub const PING: &str = "ping";
    pub const CREATE_DATA_SOURCE: &str = "createDataSource";
    pub const CLOSE_DATA_SOURCE: &str = "closeDataSource";
    pub const SUBSCRIBE_ORDER_BOOK: &str = "subscribeOrderBook";
    /// The connector registers this verb with a Cyrillic `С`.
    pub const GET_CANDLES: &str = "getСandles";
    pub const GET_TRADE_ACCOUNTS: &str = "getTradeAccounts";
    pub const GET_MONEY_LIMITS: &str = "getMoneyLimits";
    pub const GET_PORTFOLIO_INFO: &str = "getPortfolioInfo";
    pub const SEND_TRANSACTION: &str = "sendTransaction";
    pub const GET_ORDER_BY_NUMBER: &str = "getOrderByNumber";
    pub const GET_ORDER_BY_ID: &str = "getOrderById";
    pub const GET_STOP_ORDERS: &str = "getStopOrders";
}

#[derive(Debug)]
pub struct QuikClient {
    session: Session,
    config: ClientConfig,
}

impl QuikClient {
    pub async fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> Result<Self> {
        let session = Session::connect(addr, config.session.clone()).await?;
        Ok(Self::with_session(session, config))
    }

    pub fn with_session(session: Session, config: ClientConfig) -> Self {
        Self { session, config }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the connector's echo of `Ping`.
    pub async fn ping(&self) -> Result<String> {
        let result = self
            .session
            .call(commands::PING, "Ping", self.config.short_timeout)
            .await?;
        debug!("Ping answered: {}", result.message);
        Ok(result.message)
    }

    pub async fn create_data_source(&self, request: &CreateDataSourceRequest) -> Result<()> {
        debug!(
            "Creating data source {} {} interval={}",
            request.class, request.ticker, request.interval
        );
        self.query(commands::CREATE_DATA_SOURCE, request).await?;
        Ok(())
    }

    pub async fn close_data_source(&self, request: &DataSourceRequest) -> Result<()> {
        debug!(
            "Closing data source {} {} interval={}",
            request.class, request.ticker, request.interval
        );
        self.query(commands::CLOSE_DATA_SOURCE, request).await?;
        Ok(())
    }

    pub async fn subscribe_order_book(&self, request: &SubscribeOrderBookRequest) -> Result<()> {
        debug!("Subscribing to order book {} {}", request.class_code, request.sec_code);
        self.query(commands::SUBSCRIBE_ORDER_BOOK, request).await?;
        Ok(())
    }

    /// Fetches candles and renders their timestamps in the configured offset.
    pub async fn get_candles(&self, request: &GetCandlesRequest) -> Result<Vec<Candle>> {
        debug!(
            "Getting {} candles of {} interval={}",
            request.count, request.ticker, request.interval
        );
        let mut result = self.query(commands::GET_CANDLES, request).await?;
        let candles: Vec<QuikCandle> = take_list(&mut result, "candles")?;
        candles
            .iter()
            .map(|candle| candle.to_candle(self.config.utc_offset))
            .collect()
    }

    pub async fn get_trade_accounts(&self) -> Result<Vec<Account>> {
        let mut result = self.query(commands::GET_TRADE_ACCOUNTS, ()).await?;
        take_list(&mut result, "accounts")
    }

    pub async fn get_money_limits(&self) -> Result<Vec<MoneyLimits>> {
        let mut result = self.query(commands::GET_MONEY_LIMITS, ()).await?;
        take_list(&mut result, "limits")
    }

    /// Portfolio layout depends on the account type, so it stays untyped.
    pub async fn get_portfolio_info(&self, request: &GetPortfolioRequest) -> Result<Value> {
        let mut result = self.query(commands::GET_PORTFOLIO_INFO, request).await?;
        Ok(result.take_field("portfolio")?.unwrap_or(Value::Null))
    }

    pub async fn send_transaction(&self, request: &CreateOrderRequest) -> Result<()> {
        debug!(
            "Sending transaction {} {} {}",
            request.trans_id, request.action, request.sec_code
        );
        self.short(commands::SEND_TRANSACTION, request).await?;
        Ok(())
    }

    pub async fn get_order_by_number(
        &self,
        request: &GetOrderByNumberRequest,
    ) -> Result<CommandResult> {
        self.short(commands::GET_ORDER_BY_NUMBER, request).await
    }

    pub async fn get_order_by_id(&self, request: &GetOrderByIdRequest) -> Result<CommandResult> {
        self.short(commands::GET_ORDER_BY_ID, request).await
    }

    pub async fn get_stop_orders(
        &self,
        request: &GetStopOrderByTickerRequest,
    ) -> Result<CommandResult> {
        self.short(commands::GET_STOP_ORDERS, request).await
    }

    pub async fn reconnect(&self) -> Result<()> {
        self.session.reconnect().await
    }

    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }

    async fn query(&self, name: &str, payload: impl Serialize) -> Result<CommandResult> {
        self.call(name, payload, self.config.query_timeout).await
    }

    async fn short(&self, name: &str, payload: impl Serialize) -> Result<CommandResult> {
        self.call(name, payload, self.config.short_timeout).await
    }

    async fn call(
        &self,
        name: &str,
        payload: impl Serialize,
        deadline: Duration,
    ) -> Result<CommandResult> {
        let result = self.session.call(name, payload, deadline).await?;
        debug!("{} succeeded", name);
        Ok(result)
    }
}

fn take_list<T: DeserializeOwned>(result: &mut CommandResult, field: &str) -> Result<Vec<T>> {
    Ok(result.take_field(field)?.unwrap_or_default())
}
