//! Explicit execution context: site identity, output location and the
//! diagnostics sink, threaded through every call instead of a global logger.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::OptimizationMode;
use crate::store::{DatasetSource, SiteConfigStore};

/// Identity and output location of one site. Travels as the `state` field of
/// every phase message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteState {
    pub site_id: String,
    pub output_directory: PathBuf,
}

impl SiteState {
    pub fn new(site_id: impl Into<String>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            site_id: site_id.into(),
            output_directory: output_directory.into(),
        }
    }
}

/// Informational events emitted while clustering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// A synchronized round finished on every site
    Round {
        mode: OptimizationMode,
        round: usize,
        max_delta: f64,
        converged_sites: usize,
        sites: usize,
    },
    /// A local phase handler produced its output
    Phase {
        site_id: String,
        inbound: String,
        outbound: String,
    },
}

/// Receiver of diagnostic events. Shared across site threads.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, event: DiagnosticEvent) {
        match event {
            DiagnosticEvent::Round {
                mode,
                round,
                max_delta,
                converged_sites,
                sites,
            } => info!(
                "Single-Shot {} ; iter : {} delta : {:.6} ({}/{} sites converged)",
                mode, round, max_delta, converged_sites, sites
            ),
            DiagnosticEvent::Phase {
                site_id,
                inbound,
                outbound,
            } => debug!(site = %site_id, "{} -> {}", inbound, outbound),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    /// Round numbers seen so far, in emission order.
    pub fn rounds(&self) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DiagnosticEvent::Round { round, .. } => Some(*round),
                _ => None,
            })
            .collect()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn emit(&self, event: DiagnosticEvent) {
        self.events.lock().push(event);
    }
}

/// Context of an in-process run.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub sink: &'a dyn DiagnosticsSink,
}

impl<'a> RunContext<'a> {
    pub fn new(sink: &'a dyn DiagnosticsSink) -> Self {
        Self { sink }
    }
}

impl Default for RunContext<'static> {
    fn default() -> Self {
        static SINK: TracingSink = TracingSink;
        Self { sink: &SINK }
    }
}

/// Everything a local phase handler may touch: the site's identity, its
/// exclusively owned config store, its data, and the diagnostics sink.
pub struct SiteContext<'a> {
    pub state: &'a SiteState,
    pub store: &'a mut dyn SiteConfigStore,
    pub data: &'a dyn DatasetSource,
    pub sink: &'a dyn DiagnosticsSink,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        for round in 1..=3 {
            sink.emit(DiagnosticEvent::Round {
                mode: OptimizationMode::Lloyd,
                round,
                max_delta: 0.0,
                converged_sites: 0,
                sites: 2,
            });
        }
        sink.emit(DiagnosticEvent::Phase {
            site_id: "site0".into(),
            inbound: "remote_init_env".into(),
            outbound: "local_init_centroids".into(),
        });
        assert_eq!(sink.rounds(), vec![1, 2, 3]);
        assert_eq!(sink.events().len(), 4);
    }

    #[test]
    fn site_state_uses_snake_case_on_the_wire() {
        let state = SiteState::new("site1", "/tmp/out");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["site_id"], "site1");
        assert_eq!(json["output_directory"], "/tmp/out");
    }
}
