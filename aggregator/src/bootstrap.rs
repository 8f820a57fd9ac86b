// One-shot REST bootstrap against the FIX client. The store trusts no live
// event until this seed (or an explicitly allowed empty seed) has landed.

use blotter_common::{
    retry_with_backoff, BackoffPolicy, BlotterError, ExecutionReport, MarketTick, Order, Position,
    Result, SeedState,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{info, warn};

pub struct BootstrapLoader {
    base_url: String,
    http: reqwest::Client,
    attempts: u32,
    backoff: BackoffPolicy,
    execution_limit: usize,
}

impl BootstrapLoader {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        attempts: u32,
        backoff: BackoffPolicy,
        execution_limit: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            attempts,
            backoff,
            execution_limit,
        })
    }

    /// Fetches the complete seed. Positions, orders and executions are
    /// retried and then fatal; market data is best-effort because the
    /// first ticks will refresh it anyway.
    pub async fn load(&mut self) -> Result<SeedState> {
        let positions: Vec<Position> = self.fetch_required("positions", "/positions").await?;
        let orders: Vec<Order> = self.fetch_required("orders", "/orders").await?;
        let executions_path = format!("/executions?limit={}", self.execution_limit);
        let executions: Vec<ExecutionReport> =
            self.fetch_required("executions", &executions_path).await?;
        let market_data: Vec<MarketTick> = match self.fetch_once("/marketdata").await {
            Ok(ticks) => ticks,
            Err(e) => {
                warn!("market data bootstrap unavailable, continuing without it: {e}");
                Vec::new()
            }
        };
        info!(
            positions = positions.len(),
            orders = orders.len(),
            executions = executions.len(),
            ticks = market_data.len(),
            "bootstrap fetched"
        );
        Ok(SeedState {
            positions,
            orders,
            executions,
            market_data,
        })
    }

    async fn fetch_required<T: DeserializeOwned>(
        &mut self,
        what: &str,
        path: &str,
    ) -> Result<Vec<T>> {
        self.backoff.reset();
        let url = format!("{}{}", self.base_url, path);
        let http = self.http.clone();
        retry_with_backoff(&mut self.backoff, self.attempts, what, || {
            let http = http.clone();
            let url = url.clone();
            async move { fetch_array::<T>(&http, &url).await }
        })
        .await
        .map_err(|e| BlotterError::Bootstrap(format!("{what}: {e}")))
    }

    async fn fetch_once<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);
        fetch_array(&self.http, &url).await
    }
}

async fn fetch_array<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> Result<Vec<T>> {
    let response = http.get(url).send().await?.error_for_status()?;
    Ok(response.json::<Vec<T>>().await?)
}
