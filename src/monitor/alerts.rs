use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrafficAction {
    Notify { threshold: f64 },
    Delete,
}

/// Remembers the highest threshold each server has been alerted for.
#[derive(Debug, Default)]
pub struct ThresholdTracker {
    notified: HashMap<String, f64>,
}

impl ThresholdTracker {
    pub fn last_notified(&self, server: &str) -> f64 {
        self.notified.get(server).copied().unwrap_or(0.0)
    }

    /// Returns the first threshold (ascending) the usage has reached but that
    /// has not been alerted yet, and records it. At most one per call.
    pub fn crossed(&mut self, server: &str, usage: f64, thresholds: &[f64]) -> Option<f64> {
        let last = self.last_notified(server);
        let threshold = thresholds
            .iter()
            .copied()
            .find(|t| usage >= *t && last < *t)?;
        self.notified.insert(server.to_string(), threshold);
        Some(threshold)
    }

    pub fn forget(&mut self, server: &str) {
        self.notified.remove(server);
    }

    pub fn evaluate(
        &mut self,
        server: &str,
        usage: f64,
        thresholds: &[f64],
        limit: f64,
    ) -> Vec<TrafficAction> {
        let mut actions = Vec::new();
        if let Some(threshold) = self.crossed(server, usage, thresholds) {
            actions.push(TrafficAction::Notify { threshold });
        }
        if usage >= limit {
            actions.push(TrafficAction::Delete);
        }
        actions
    }
}
