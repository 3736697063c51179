//! RSI oscillator analysis
//!
//! Computes the Wilder-smoothed relative strength index over the loaded
//! history, classifies the current reading against overbought/oversold
//! thresholds and summarizes the indicator's recent behaviour.

use crate::error::{ForecastError, Result};
use crate::features;
use crate::forecaster::{load_history, ForecasterConfig, LoadedHistory};
use crate::stats;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

const RECENT_DAYS: usize = 10;

#[derive(Debug, Clone)]
pub struct RsiParams {
    pub window: usize,
    pub overbought: f64,
    pub oversold: f64,
    /// Readings past these extremes upgrade the signal to strong
    pub strong_overbought: f64,
    pub strong_oversold: f64,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self {
            window: 14,
            overbought: 70.0,
            oversold: 30.0,
            strong_overbought: 80.0,
            strong_oversold: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RsiSignal {
    Overbought,
    Oversold,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Confidence {
    Strong,
    Moderate,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct RsiAnalysis {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub window: usize,
    pub current_rsi: f64,
    pub signal: RsiSignal,
    pub confidence: Confidence,
    pub recommendation: String,
    /// Days the indicator spent in each regime over the full history
    pub overbought_days: usize,
    pub oversold_days: usize,
    pub average_rsi: f64,
    pub max_rsi: f64,
    pub min_rsi: f64,
    pub recent: Vec<(NaiveDate, f64)>,
}

pub struct RsiAnalyzer {
    config: ForecasterConfig,
    params: RsiParams,
    analysis: RsiAnalysis,
}

impl RsiAnalyzer {
    pub fn new(provider: &dyn market_data::MarketDataProvider, config: ForecasterConfig) -> Result<Self> {
        let history = load_history(provider, &config)?;
        Self::from_history(config, history, RsiParams::default())
    }

    pub fn from_history(
        config: ForecasterConfig,
        history: LoadedHistory,
        params: RsiParams,
    ) -> Result<Self> {
        if params.oversold >= params.overbought {
            return Err(ForecastError::InvalidParameter(format!(
                "oversold threshold {} must be below overbought {}",
                params.oversold, params.overbought
            )));
        }
        let values = features::rsi(&history.target, params.window);
        let dated: Vec<(NaiveDate, f64)> = history
            .series
            .dates()
            .iter()
            .zip(&values)
            .filter(|(_, v)| !v.is_nan())
            .map(|(d, v)| (*d, *v))
            .collect();
        if dated.len() < RECENT_DAYS {
            return Err(ForecastError::InsufficientData(format!(
                "RSI needs at least {} valid readings, got {}",
                RECENT_DAYS,
                dated.len()
            )));
        }

        let (as_of, current) = *dated.last().ok_or_else(|| {
            ForecastError::InsufficientData("empty RSI series".to_string())
        })?;
        let signal = if current >= params.overbought {
            RsiSignal::Overbought
        } else if current <= params.oversold {
            RsiSignal::Oversold
        } else {
            RsiSignal::Neutral
        };
        let confidence = match signal {
            RsiSignal::Overbought if current >= params.strong_overbought => Confidence::Strong,
            RsiSignal::Oversold if current <= params.strong_oversold => Confidence::Strong,
            RsiSignal::Neutral => Confidence::Low,
            _ => Confidence::Moderate,
        };
        let recommendation = match (&signal, confidence) {
            (RsiSignal::Overbought, Confidence::Strong) => {
                "Strongly overbought; consider taking profits".to_string()
            }
            (RsiSignal::Overbought, _) => "Overbought; watch for a pullback".to_string(),
            (RsiSignal::Oversold, Confidence::Strong) => {
                "Strongly oversold; potential buying opportunity".to_string()
            }
            (RsiSignal::Oversold, _) => "Oversold; watch for a rebound".to_string(),
            (RsiSignal::Neutral, _) => "Neutral; no actionable signal".to_string(),
        };

        let raw: Vec<f64> = dated.iter().map(|(_, v)| *v).collect();
        let overbought_days = raw.iter().filter(|v| **v >= params.overbought).count();
        let oversold_days = raw.iter().filter(|v| **v <= params.oversold).count();
        let average_rsi = stats::mean(&raw);
        let max_rsi = raw.iter().copied().fold(f64::MIN, f64::max);
        let min_rsi = raw.iter().copied().fold(f64::MAX, f64::min);
        let recent = dated[dated.len() - RECENT_DAYS..].to_vec();

        let analysis = RsiAnalysis {
            symbol: config.symbol.clone(),
            as_of,
            window: params.window,
            current_rsi: current,
            signal,
            confidence,
            recommendation,
            overbought_days,
            oversold_days,
            average_rsi,
            max_rsi,
            min_rsi,
            recent,
        };
        info!(
            symbol = %config.symbol,
            rsi = current,
            signal = ?analysis.signal,
            "RSI analysis complete"
        );

        Ok(Self {
            config,
            params,
            analysis,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn params(&self) -> &RsiParams {
        &self.params
    }

    pub fn analysis(&self) -> &RsiAnalysis {
        &self.analysis
    }

    /// Writes the last readings to `{symbol}_rsi_analysis_{timestamp}.csv`
    pub fn save_analysis(&self, dir: &Path) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_rsi_analysis_{}.csv", self.config.symbol, stamp));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["Date", "Rsi", "Signal"])?;
        for (date, value) in &self.analysis.recent {
            let signal = if *value >= self.params.overbought {
                "Overbought"
            } else if *value <= self.params.oversold {
                "Oversold"
            } else {
                "Neutral"
            };
            writer.write_record([
                date.format("%Y-%m-%d").to_string(),
                format!("{:.2}", value),
                signal.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(path)
    }
}
