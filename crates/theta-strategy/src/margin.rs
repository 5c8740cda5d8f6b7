//! Trade margin resolution.
//!
//! The margin is the ROI denominator. [`SpanMarginClient`] asks the broker's
//! SPAN calculator what the short legs require and pads the answer with a
//! safety buffer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use theta_core::config::MarginConfig;
use theta_core::{OptionLeg, OptionType, ThetaError, round_price};
use theta_md::json_util::parse_str_f64;
use tracing::{debug, info};

#[async_trait]
pub trait MarginSource: Send + Sync {
    /// Margin committed to selling `quantity` of every leg.
    async fn trade_margin(&self, legs: &[OptionLeg], quantity: u64) -> Result<f64, ThetaError>;
}

/// A configured margin figure.
#[derive(Debug, Clone, Copy)]
pub struct FixedMargin(pub f64);

#[async_trait]
impl MarginSource for FixedMargin {
    async fn trade_margin(&self, _legs: &[OptionLeg], _quantity: u64) -> Result<f64, ThetaError> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// SPAN calculator
// ---------------------------------------------------------------------------

/// Client for a SPAN calculator endpoint taking `jData=<json>&jKey=<token>`.
pub struct SpanMarginClient {
    http: reqwest::Client,
    url: String,
    user: String,
    account_id: String,
    token: String,
    product: String,
    buffer: f64,
}

impl SpanMarginClient {
    pub fn new(
        url: String,
        user: String,
        account_id: String,
        token: String,
        product: String,
        buffer: f64,
    ) -> Result<Self, ThetaError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ThetaError::Config(format!("http client: {e}")))?;
        Ok(Self { http, url, user, account_id, token, product, buffer })
    }

    /// Request body for selling `quantity` of each leg.
    pub fn request(&self, legs: &[OptionLeg], quantity: u64) -> Value {
        let pos: Vec<Value> = legs
            .iter()
            .map(|l| {
                let optt = match l.option_type {
                    OptionType::Call => "CE",
                    OptionType::Put => "PE",
                };
                json!({
                    "prd": self.product,
                    "exch": l.exchange.as_deref().unwrap_or("NFO"),
                    "instname": l.instrument.as_deref().unwrap_or("OPTIDX"),
                    "symname": l.underlying.as_deref().unwrap_or(&l.symbol),
                    "exd": l.expiry.as_deref().unwrap_or(""),
                    "optt": optt,
                    "strprc": l.strike.map(|s| s.to_string()).unwrap_or_default(),
                    "buyqty": "0",
                    "sellqty": quantity.to_string(),
                    "netqty": "",
                })
            })
            .collect();

        json!({ "uid": self.user, "actid": self.account_id, "pos": pos })
    }
}

/// Extract the padded trade margin from a calculator response.
///
/// Requires `stat == "Ok"`; the margin is `(span_trade + expo_trade) * buffer`
/// rounded to two places.
pub fn parse_span_response(v: &Value, buffer: f64) -> Result<f64, ThetaError> {
    let stat = v.get("stat").and_then(Value::as_str).unwrap_or("");
    if stat != "Ok" {
        let emsg = v.get("emsg").and_then(Value::as_str).unwrap_or("no error message");
        return Err(ThetaError::MarginResolutionFailed(format!("stat={stat:?}: {emsg}")));
    }
    let span_trade = parse_str_f64(v.get("span_trade")).unwrap_or(0.0);
    let expo_trade = parse_str_f64(v.get("expo_trade")).unwrap_or(0.0);
    let margin = round_price((span_trade + expo_trade) * buffer, 2);
    if margin <= 0.0 {
        return Err(ThetaError::MarginResolutionFailed(format!("non-positive margin {margin}")));
    }
    Ok(margin)
}

#[async_trait]
impl MarginSource for SpanMarginClient {
    async fn trade_margin(&self, legs: &[OptionLeg], quantity: u64) -> Result<f64, ThetaError> {
        let body = self.request(legs, quantity);
        debug!("[margin] span request {body}");

        let fail = |e: reqwest::Error| ThetaError::MarginResolutionFailed(e.to_string());
        let form = [("jData", body.to_string()), ("jKey", self.token.clone())];
        let resp = self.http.post(&self.url).form(&form).send().await.map_err(fail)?;
        let v: Value = resp.error_for_status().map_err(fail)?.json().await.map_err(fail)?;

        let margin = parse_span_response(&v, self.buffer)?;
        info!("[margin] trade margin {margin} for {} legs x {quantity}", legs.len());
        Ok(margin)
    }
}

/// Build the margin source described by `cfg`.
///
/// The SPAN token is read from the configured environment variable.
pub fn margin_from_config(cfg: &MarginConfig) -> Result<Arc<dyn MarginSource>, ThetaError> {
    match cfg {
        MarginConfig::Fixed { trade_margin } => Ok(Arc::new(FixedMargin(*trade_margin))),
        MarginConfig::Span { url, user, account_id, token_env, product, buffer } => {
            let token = std::env::var(token_env)
                .map_err(|_| ThetaError::Config(format!("environment variable {token_env} not set")))?;
            Ok(Arc::new(SpanMarginClient::new(
                url.clone(),
                user.clone(),
                account_id.clone(),
                token,
                product.clone(),
                *buffer,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(option_type: OptionType) -> OptionLeg {
        OptionLeg {
            symbol: "NIFTY30JAN25C22150".into(),
            exchange: Some("NFO".into()),
            token: Some("43651".into()),
            option_type,
            strike: Some(22_150.0),
            lot_size: 75,
            instrument: Some("OPTIDX".into()),
            underlying: Some("NIFTY".into()),
            expiry: Some("30-JAN-2025".into()),
        }
    }

    #[test]
    fn parses_ok_response_with_buffer() {
        let v = json!({ "stat": "Ok", "span": "1", "expo": "1", "span_trade": "100000", "expo_trade": "20000" });
        let m = parse_span_response(&v, 1.009).unwrap();
        assert!((m - 121_080.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_not_ok() {
        let v = json!({ "stat": "Not_Ok", "emsg": "Session Expired" });
        assert!(matches!(
            parse_span_response(&v, 1.009),
            Err(ThetaError::MarginResolutionFailed(m)) if m.contains("Session Expired")
        ));
        let zero = json!({ "stat": "Ok", "span_trade": "0", "expo_trade": "0" });
        assert!(parse_span_response(&zero, 1.009).is_err());
    }

    #[test]
    fn request_lists_short_legs() {
        let c = SpanMarginClient::new(
            "https://broker.example/SpanCalc".into(),
            "U1".into(),
            "A1".into(),
            "tok".into(),
            "I".into(),
            1.009,
        )
        .unwrap();
        let body = c.request(&[leg(OptionType::Call), leg(OptionType::Put)], 75);
        assert_eq!(body["actid"], "A1");
        let pos = body["pos"].as_array().unwrap();
        assert_eq!(pos.len(), 2);
        assert_eq!(pos[0]["optt"], "CE");
        assert_eq!(pos[1]["optt"], "PE");
        assert_eq!(pos[0]["sellqty"], "75");
        assert_eq!(pos[0]["strprc"], "22150");
        assert_eq!(pos[0]["symname"], "NIFTY");
    }

    #[tokio::test]
    async fn fixed_margin() {
        let m = FixedMargin(150_000.0).trade_margin(&[], 75).await.unwrap();
        assert_eq!(m, 150_000.0);
    }
}
