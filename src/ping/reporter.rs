use crate::ping::correlator::Sample;
use crate::ping::counters::CounterSnapshot;
use crate::ping::error::{PingError, Result};
use crate::ping::statistics::Statistics;
use colored::*;
use std::io::Write;
use tracing::{debug, info};

/// The two endpoints a session probes between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub addr1: String,
    pub addr2: String,
    pub relay1: String,
    pub relay2: String,
}

impl Route {
    pub fn new(addr1: &str, addr2: &str) -> Result<Self> {
        Ok(Self {
            relay1: domain_of(addr1)?.to_string(),
            relay2: domain_of(addr2)?.to_string(),
            addr1: addr1.to_string(),
            addr2: addr2.to_string(),
        })
    }
}

fn domain_of(addr: &str) -> Result<&str> {
    match addr.split_once('@') {
        Some((_, domain)) if !domain.is_empty() => Ok(domain),
        _ => Err(PingError::Account(format!("address without domain: {}", addr))),
    }
}

/// Ping-style console report.
pub struct Reporter {
    route: Route,
    color: bool,
    percentiles: bool,
}

impl Reporter {
    pub fn new(route: Route) -> Self {
        Self {
            route,
            color: false,
            percentiles: false,
        }
    }

    /// Colour the loss line (green when nothing was lost).
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Add a p50/p90/p99 line under the rtt summary.
    pub fn with_percentiles(mut self, percentiles: bool) -> Self {
        self.percentiles = percentiles;
        self
    }

    pub fn print_header<W: Write>(&self, out: &mut W, count: u64, interval_secs: f64) -> Result<()> {
        let route = &self.route;
        writeln!(
            out,
            "CMPING {}({}) -> {}({}) count={} interval={:?}s",
            route.relay1,
            route.addr1,
            route.relay2,
            route.addr2,
            count,
            interval_secs
        )?;
        Ok(())
    }

    pub fn print_sample<W: Write>(&self, out: &mut W, sample: &Sample) -> Result<()> {
        writeln!(
            out,
            "{} bytes ME -> {} -> {} -> ME seq={} time={:.2}ms",
            sample.size, self.route.relay1, self.route.relay2, sample.sequence, sample.round_trip_ms
        )?;
        out.flush()?;
        Ok(())
    }

    /// Print the closing statistics block. Latency lines are omitted when no
    /// probe came back.
    pub fn print_summary<W: Write>(
        &self,
        out: &mut W,
        counters: CounterSnapshot,
        stats: &Statistics,
    ) -> Result<()> {
        debug!(
            sent = counters.sent,
            received = counters.received,
            samples = stats.count(),
            "Printing session statistics"
        );
        writeln!(
            out,
            "--- {} -> {} statistics ---",
            self.route.addr1, self.route.addr2
        )?;

        let loss_line = format!(
            "{} transmitted, {} received, {:.2}% loss",
            counters.sent,
            counters.received,
            counters.loss_percent()
        );
        if self.color {
            let colored = if counters.is_complete() && counters.sent > 0 {
                loss_line.green()
            } else {
                loss_line.red()
            };
            writeln!(out, "{}", colored)?;
        } else {
            writeln!(out, "{}", loss_line)?;
        }

        if !stats.is_empty() {
            writeln!(
                out,
                "rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
                stats.min(),
                stats.mean(),
                stats.max(),
                stats.mdev()
            )?;
            if self.percentiles {
                writeln!(
                    out,
                    "rtt p50/p90/p99 = {:.3}/{:.3}/{:.3} ms",
                    stats.percentile(0.5),
                    stats.percentile(0.9),
                    stats.percentile(0.99)
                )?;
            }
        }
        out.flush()?;

        info!(
            sent = counters.sent,
            received = counters.received,
            loss_percent = counters.loss_percent(),
            mean_ms = stats.mean(),
            "Results reported"
        );
        Ok(())
    }
}
