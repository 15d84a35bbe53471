use std::collections::BTreeMap;

use crate::engine::{events::Direction, portfolio::FillRecord};

/// Annualization factor for minute bars: 252 trading days of 375 minutes.
const MINUTES_PER_YEAR: f64 = 252.0 * 375.0;

/// Metrics derived from an equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EquityMetrics {
    pub total_return: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub final_equity: f64,
}

/// Metrics derived from the fills ledger via FIFO round-trip pairing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FillMetrics {
    /// Round trips: min of the buy fill count and the sell fill count.
    pub total_trades: usize,
    /// Winning fraction of the FIFO-matched lot PnLs.
    pub win_rate: f64,
    /// Gross gains over gross losses; infinite with gains and no losses.
    pub profit_factor: f64,
    pub max_capital_at_risk: f64,
}

/// Standardized performance metrics over an equity curve and an optional
/// fills ledger.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PerformanceMetrics {
    pub equity: EquityMetrics,
    pub fills: Option<FillMetrics>,
    /// Fraction of bars with a non-flat position, when known.
    pub exposure: Option<f64>,
}

pub struct MetricsService;

impl MetricsService {
    /// Computes equity-curve metrics. Curves shorter than two points
    /// return the zeroed set with `final_equity = initial_cash`.
    pub fn equity_metrics(equity: &[f64], initial_cash: f64) -> EquityMetrics {
        if equity.len() < 2 {
            return EquityMetrics {
                final_equity: initial_cash,
                ..Default::default()
            };
        }

        let final_equity = equity[equity.len() - 1];
        let total_return = final_equity / initial_cash - 1.0;

        let mut running_max = f64::MIN;
        let mut max_drawdown: f64 = 0.0;
        for value in equity {
            running_max = running_max.max(*value);
            if running_max > 0.0 {
                max_drawdown = max_drawdown.min((value - running_max) / running_max);
            }
        }

        // Per-bar equity returns, annualized for minute bars.
        let returns: Vec<f64> = equity
            .windows(2)
            .map(|pair| {
                if pair[0] != 0.0 {
                    pair[1] / pair[0] - 1.0
                } else {
                    0.0
                }
            })
            .collect();
        let sharpe = Self::sharpe(&returns);

        EquityMetrics {
            total_return,
            max_drawdown,
            sharpe,
            final_equity,
        }
    }

    fn sharpe(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = variance.sqrt();
        if std == 0.0 {
            return 0.0;
        }
        mean / std * MINUTES_PER_YEAR.sqrt()
    }

    /// Pairs fills into round trips (FIFO) and derives trade statistics.
    ///
    /// `total_trades` is min(buy fills, sell fills). A sell spanning
    /// several buy lots produces one matched-lot PnL per lot; win rate
    /// and profit factor are computed over those lot PnLs.
    pub fn fill_metrics(fills: &[FillRecord]) -> FillMetrics {
        // Outstanding buy lots: (quantity, price, commission per unit).
        let mut open: std::collections::VecDeque<(f64, f64, f64)> =
            std::collections::VecDeque::new();
        let mut trade_pnls: Vec<f64> = Vec::new();
        let mut buy_fills = 0_usize;
        let mut sell_fills = 0_usize;
        let mut at_risk = 0.0_f64;
        let mut max_at_risk = 0.0_f64;

        for fill in fills {
            match fill.direction {
                Direction::Buy => {
                    buy_fills += 1;
                    let commission_per_unit = if fill.quantity > 0.0 {
                        fill.commission / fill.quantity
                    } else {
                        0.0
                    };
                    open.push_back((fill.quantity, fill.price, commission_per_unit));
                    at_risk += fill.quantity * fill.price;
                    max_at_risk = max_at_risk.max(at_risk);
                }
                Direction::Sell => {
                    sell_fills += 1;
                    let mut remaining = fill.quantity;
                    let sell_commission_per_unit = if fill.quantity > 0.0 {
                        fill.commission / fill.quantity
                    } else {
                        0.0
                    };
                    while remaining > 0.0 {
                        let Some((lot_qty, lot_price, lot_commission)) = open.front_mut() else {
                            break;
                        };
                        let matched = remaining.min(*lot_qty);
                        let pnl = (fill.price - *lot_price) * matched
                            - (sell_commission_per_unit + *lot_commission) * matched;
                        trade_pnls.push(pnl);

                        at_risk -= matched * *lot_price;
                        *lot_qty -= matched;
                        remaining -= matched;
                        if *lot_qty <= 0.0 {
                            open.pop_front();
                        }
                    }
                }
            }
        }

        // Round trips per the published formula: every sell closes (part
        // of) a prior buy, so completed trips are bounded by the smaller
        // fill count.
        let total_trades = buy_fills.min(sell_fills);

        let segments = trade_pnls.len();
        let winners = trade_pnls.iter().filter(|pnl| **pnl > 0.0).count();
        let gains: f64 = trade_pnls.iter().filter(|pnl| **pnl > 0.0).sum();
        let losses: f64 = trade_pnls
            .iter()
            .filter(|pnl| **pnl < 0.0)
            .map(|pnl| pnl.abs())
            .sum();

        let win_rate = if segments > 0 {
            winners as f64 / segments as f64
        } else {
            0.0
        };
        let profit_factor = if losses > 0.0 {
            gains / losses
        } else if gains > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        FillMetrics {
            total_trades,
            win_rate,
            profit_factor,
            max_capital_at_risk: max_at_risk,
        }
    }

    pub fn calculate(
        equity: &[f64],
        initial_cash: f64,
        fills: Option<&[FillRecord]>,
        exposure: Option<f64>,
    ) -> PerformanceMetrics {
        PerformanceMetrics {
            equity: Self::equity_metrics(equity, initial_cash),
            fills: fills.map(Self::fill_metrics),
            exposure,
        }
    }
}

impl PerformanceMetrics {
    /// Renders the display map consumed by API clients and the scanner.
    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(
            "Total Return".to_string(),
            format!("{:.2}%", self.equity.total_return * 100.0),
        );
        map.insert(
            "Max Drawdown".to_string(),
            format!("{:.2}%", self.equity.max_drawdown * 100.0),
        );
        map.insert(
            "Sharpe Ratio".to_string(),
            format!("{:.2}", self.equity.sharpe),
        );
        map.insert(
            "Final Equity".to_string(),
            format!("{:.2}", self.equity.final_equity),
        );
        if let Some(fills) = &self.fills {
            map.insert("Total Trades".to_string(), fills.total_trades.to_string());
            map.insert(
                "Win Rate".to_string(),
                format!("{:.2}%", fills.win_rate * 100.0),
            );
            map.insert(
                "Profit Factor".to_string(),
                if fills.profit_factor.is_infinite() {
                    "inf".to_string()
                } else {
                    format!("{:.2}", fills.profit_factor)
                },
            );
            map.insert(
                "Max Capital At Risk".to_string(),
                format!("{:.2}", fills.max_capital_at_risk),
            );
        }
        if let Some(exposure) = self.exposure {
            map.insert("Exposure".to_string(), format!("{:.2}%", exposure * 100.0));
        }
        map
    }
}

/// Numeric interpretation of a display map's `Total Return` for ranking.
pub fn parse_total_return(metrics: &BTreeMap<String, String>) -> f64 {
    metrics
        .get("Total Return")
        .map(|value| value.replace(['%', ','], ""))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0.0)
}
