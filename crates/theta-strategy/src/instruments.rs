//! Leg selection.

use std::sync::Arc;

use async_trait::async_trait;
use theta_core::config::InstrumentConfig;
use theta_core::retry::RetryPolicy;
use theta_core::{OptionLeg, OptionType, ThetaError, atm_strike, straddle_strikes};
use theta_md::{QuoteSource, fetch_price};
use tracing::info;

/// Chooses the option legs of the straddle.
#[async_trait]
pub trait InstrumentResolver: Send + Sync {
    async fn resolve(&self) -> Result<Vec<OptionLeg>, ThetaError>;
}

/// Configured legs, returned as-is.
#[derive(Debug, Clone)]
pub struct StaticLegs {
    legs: Vec<OptionLeg>,
}

impl StaticLegs {
    pub fn new(legs: Vec<OptionLeg>) -> Self {
        Self { legs }
    }
}

#[async_trait]
impl InstrumentResolver for StaticLegs {
    async fn resolve(&self) -> Result<Vec<OptionLeg>, ThetaError> {
        if self.legs.is_empty() {
            return Err(ThetaError::InstrumentResolution("no legs configured".into()));
        }
        Ok(self.legs.clone())
    }
}

/// Picks the call and put around the underlying's at-the-money strike.
pub struct AtmChainResolver {
    pub underlying: String,
    pub strike_step: f64,
    pub otm_points: f64,
    pub bias_points: f64,
    pub chain: Vec<OptionLeg>,
    quotes: Arc<dyn QuoteSource>,
    retry: RetryPolicy,
}

impl AtmChainResolver {
    pub fn new(
        underlying: String,
        strike_step: f64,
        chain: Vec<OptionLeg>,
        quotes: Arc<dyn QuoteSource>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            underlying,
            strike_step,
            otm_points: 0.0,
            bias_points: 0.0,
            chain,
            quotes,
            retry,
        }
    }

    pub fn with_offsets(mut self, otm_points: f64, bias_points: f64) -> Self {
        self.otm_points = otm_points;
        self.bias_points = bias_points;
        self
    }

    fn find(&self, option_type: OptionType, strike: f64) -> Result<OptionLeg, ThetaError> {
        self.chain
            .iter()
            .find(|l| {
                l.option_type == option_type
                    && l.strike.is_some_and(|s| (s - strike).abs() < 1e-6)
            })
            .cloned()
            .ok_or_else(|| {
                ThetaError::InstrumentResolution(format!(
                    "no {option_type:?} at strike {strike} in the configured chain"
                ))
            })
    }
}

#[async_trait]
impl InstrumentResolver for AtmChainResolver {
    async fn resolve(&self) -> Result<Vec<OptionLeg>, ThetaError> {
        let price = fetch_price(self.quotes.as_ref(), &self.underlying, &self.retry)
            .await
            .map_err(|e| ThetaError::InstrumentResolution(e.to_string()))?;

        let atm = atm_strike(price, self.strike_step);
        let (call_strike, put_strike) = straddle_strikes(atm, self.otm_points, self.bias_points);
        info!(
            "[instruments] {} @ {price}: atm={atm} call={call_strike} put={put_strike}",
            self.underlying
        );

        Ok(vec![self.find(OptionType::Call, call_strike)?, self.find(OptionType::Put, put_strike)?])
    }
}

/// Build the resolver described by `cfg`.
pub fn resolver_from_config(
    cfg: &InstrumentConfig,
    quotes: Arc<dyn QuoteSource>,
    retry: RetryPolicy,
) -> Arc<dyn InstrumentResolver> {
    match cfg {
        InstrumentConfig::Static { legs } => Arc::new(StaticLegs::new(legs.clone())),
        InstrumentConfig::Atm { underlying, strike_step, otm_points, bias_points, chain } => {
            Arc::new(
                AtmChainResolver::new(underlying.clone(), *strike_step, chain.clone(), quotes, retry)
                    .with_offsets(*otm_points, *bias_points),
            )
        }
    }
}
