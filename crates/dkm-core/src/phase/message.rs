//! Phase message types.
//!
//! Requests arrive in a loose wire shape ([`PhaseRequest`]) whose payload
//! fields are all optional. They are validated once, at construction of an
//! [`InboundMessage`], into a variant that carries exactly the fields its
//! phase needs. Responses are typed from the start.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::SiteInit;
use crate::context::SiteState;
use crate::data::Point;
use crate::error::{DkmError, Result};

/// Phase last completed by the remote role, tagging a request to a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemotePhase {
    RemoteInitEnv,
    RemoteInitCentroids,
    RemoteOptimizationStep,
    RemoteConvergedFalse,
    RemoteAggregateOutput,
}

impl RemotePhase {
    pub const ALL: [RemotePhase; 5] = [
        RemotePhase::RemoteInitEnv,
        RemotePhase::RemoteInitCentroids,
        RemotePhase::RemoteOptimizationStep,
        RemotePhase::RemoteConvergedFalse,
        RemotePhase::RemoteAggregateOutput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteInitEnv => "remote_init_env",
            Self::RemoteInitCentroids => "remote_init_centroids",
            Self::RemoteOptimizationStep => "remote_optimization_step",
            Self::RemoteConvergedFalse => "remote_converged_false",
            Self::RemoteAggregateOutput => "remote_aggregate_output",
        }
    }
}

impl fmt::Display for RemotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemotePhase {
    type Err = DkmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DkmError::UnknownPhase(s.to_string()))
    }
}

/// Loose request payload as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_centroids: Option<Vec<Point>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_labels: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<SiteInit>,
}

/// `{state, input}` request delivered to a local role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRequest {
    pub state: SiteState,
    #[serde(default)]
    pub input: PhaseInput,
}

/// A validated request: one variant per inbound phase, each with exactly
/// the fields that phase requires.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// No phase yet: the protocol is starting
    Start,
    InitEnv {
        raw_data_ref: String,
        init: SiteInit,
    },
    InitCentroids {
        config_ref: String,
        remote_centroids: Vec<Point>,
    },
    OptimizationStep {
        config_ref: String,
        remote_centroids: Vec<Point>,
        cluster_labels: Vec<usize>,
    },
    ConvergedFalse {
        config_ref: String,
        remote_centroids: Vec<Point>,
    },
    AggregateOutput {
        config_ref: String,
        remote_centroids: Vec<Point>,
    },
}

fn require<T>(value: Option<T>, phase: RemotePhase, field: &str) -> Result<T> {
    value.ok_or_else(|| DkmError::missing(phase.as_str(), field))
}

impl TryFrom<PhaseInput> for InboundMessage {
    type Error = DkmError;

    fn try_from(input: PhaseInput) -> Result<Self> {
        let phase = match input.phase.as_deref() {
            None => return Ok(InboundMessage::Start),
            Some(tag) => tag.parse::<RemotePhase>()?,
        };

        Ok(match phase {
            RemotePhase::RemoteInitEnv => InboundMessage::InitEnv {
                raw_data_ref: require(input.raw_data_ref, phase, "raw_data_ref")?,
                init: input.init.unwrap_or_default(),
            },
            RemotePhase::RemoteInitCentroids => InboundMessage::InitCentroids {
                config_ref: require(input.config_ref, phase, "config_ref")?,
                remote_centroids: require(input.remote_centroids, phase, "remote_centroids")?,
            },
            RemotePhase::RemoteOptimizationStep => InboundMessage::OptimizationStep {
                config_ref: require(input.config_ref, phase, "config_ref")?,
                remote_centroids: require(input.remote_centroids, phase, "remote_centroids")?,
                cluster_labels: require(input.cluster_labels, phase, "cluster_labels")?,
            },
            RemotePhase::RemoteConvergedFalse => InboundMessage::ConvergedFalse {
                config_ref: require(input.config_ref, phase, "config_ref")?,
                remote_centroids: require(input.remote_centroids, phase, "remote_centroids")?,
            },
            RemotePhase::RemoteAggregateOutput => InboundMessage::AggregateOutput {
                config_ref: require(input.config_ref, phase, "config_ref")?,
                remote_centroids: require(input.remote_centroids, phase, "remote_centroids")?,
            },
        })
    }
}

impl InboundMessage {
    /// Phase tag this message carries, `None` for the start message.
    pub fn phase(&self) -> Option<RemotePhase> {
        match self {
            Self::Start => None,
            Self::InitEnv { .. } => Some(RemotePhase::RemoteInitEnv),
            Self::InitCentroids { .. } => Some(RemotePhase::RemoteInitCentroids),
            Self::OptimizationStep { .. } => Some(RemotePhase::RemoteOptimizationStep),
            Self::ConvergedFalse { .. } => Some(RemotePhase::RemoteConvergedFalse),
            Self::AggregateOutput { .. } => Some(RemotePhase::RemoteAggregateOutput),
        }
    }

    /// Wire form of this message.
    pub fn into_input(self) -> PhaseInput {
        let phase = self.phase().map(|p| p.as_str().to_string());
        let mut input = PhaseInput {
            phase,
            ..Default::default()
        };
        match self {
            Self::Start => {}
            Self::InitEnv { raw_data_ref, init } => {
                input.raw_data_ref = Some(raw_data_ref);
                input.init = Some(init);
            }
            Self::InitCentroids {
                config_ref,
                remote_centroids,
            }
            | Self::ConvergedFalse {
                config_ref,
                remote_centroids,
            }
            | Self::AggregateOutput {
                config_ref,
                remote_centroids,
            } => {
                input.config_ref = Some(config_ref);
                input.remote_centroids = Some(remote_centroids);
            }
            Self::OptimizationStep {
                config_ref,
                remote_centroids,
                cluster_labels,
            } => {
                input.config_ref = Some(config_ref);
                input.remote_centroids = Some(remote_centroids);
                input.cluster_labels = Some(cluster_labels);
            }
        }
        input
    }

    pub fn into_request(self, state: SiteState) -> PhaseRequest {
        PhaseRequest {
            state,
            input: self.into_input(),
        }
    }
}

/// Output of a local handler, tagged with the phase it completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseOutput {
    LocalNoop,
    LocalInitCentroids {
        config_ref: String,
        centroids: Vec<Point>,
    },
    LocalComputeClustering {
        config_ref: String,
        remote_centroids: Vec<Point>,
        cluster_labels: Vec<usize>,
    },
    LocalComputeOptimizer {
        config_ref: String,
        centroids: Vec<Point>,
        delta: f64,
        converged: bool,
    },
    LocalAggregateOutput {
        config_ref: String,
        cluster_labels: Vec<usize>,
    },
}

impl PhaseOutput {
    pub fn phase_name(&self) -> &'static str {
        match self {
            Self::LocalNoop => "local_noop",
            Self::LocalInitCentroids { .. } => "local_init_centroids",
            Self::LocalComputeClustering { .. } => "local_compute_clustering",
            Self::LocalComputeOptimizer { .. } => "local_compute_optimizer",
            Self::LocalAggregateOutput { .. } => "local_aggregate_output",
        }
    }
}

/// `{output, state}` response produced by a local role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResponse {
    pub output: PhaseOutput,
    pub state: SiteState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::vector;
    use serde_json::json;

    #[test]
    fn phase_tags_round_trip_through_strings() {
        for phase in RemotePhase::ALL {
            assert_eq!(phase.as_str().parse::<RemotePhase>().unwrap(), phase);
            let json = serde_json::to_value(phase).unwrap();
            assert_eq!(json, json!(phase.as_str()));
        }
    }

    #[test]
    fn missing_phase_means_start() {
        let message = InboundMessage::try_from(PhaseInput::default()).unwrap();
        assert_eq!(message, InboundMessage::Start);
    }

    #[test]
    fn unknown_phase_is_rejected() {
        let input = PhaseInput {
            phase: Some("remote_reticulate_splines".into()),
            ..Default::default()
        };
        match InboundMessage::try_from(input) {
            Err(DkmError::UnknownPhase(tag)) => assert_eq!(tag, "remote_reticulate_splines"),
            other => panic!("expected unknown phase, got {:?}", other),
        }
    }

    #[test]
    fn missing_field_is_named() {
        let input = PhaseInput {
            phase: Some("remote_optimization_step".into()),
            config_ref: Some("cfg".into()),
            remote_centroids: Some(vec![vector(&[0.0])]),
            ..Default::default()
        };
        match InboundMessage::try_from(input) {
            Err(DkmError::Validation { phase, field }) => {
                assert_eq!(phase, "remote_optimization_step");
                assert_eq!(field, "cluster_labels");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn init_env_only_needs_data_ref() {
        let input = PhaseInput {
            phase: Some("remote_init_env".into()),
            raw_data_ref: Some("site0.json".into()),
            ..Default::default()
        };
        let message = InboundMessage::try_from(input).unwrap();
        assert_eq!(
            message,
            InboundMessage::InitEnv {
                raw_data_ref: "site0.json".into(),
                init: SiteInit::default(),
            }
        );
    }

    #[test]
    fn messages_convert_back_to_wire_form() {
        let message = InboundMessage::OptimizationStep {
            config_ref: "cfg".into(),
            remote_centroids: vec![vector(&[1.0, 2.0])],
            cluster_labels: vec![0, 0],
        };
        let input = message.clone().into_input();
        assert_eq!(input.phase.as_deref(), Some("remote_optimization_step"));
        assert_eq!(InboundMessage::try_from(input).unwrap(), message);
    }

    #[test]
    fn request_parses_from_json() {
        let request: PhaseRequest = serde_json::from_value(json!({
            "state": {"site_id": "site0", "output_directory": "/tmp/site0"},
            "input": {"phase": "remote_init_env", "raw_data_ref": "site0.json", "init": {"k": 3}}
        }))
        .unwrap();
        let message = InboundMessage::try_from(request.input).unwrap();
        match message {
            InboundMessage::InitEnv { init, .. } => assert_eq!(init.k, Some(3)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn output_is_tagged_with_phase() {
        let output = PhaseOutput::LocalAggregateOutput {
            config_ref: "cfg".into(),
            cluster_labels: vec![1, 0],
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["phase"], "local_aggregate_output");
        assert_eq!(json["phase"], output.phase_name());
        assert_eq!(serde_json::to_value(PhaseOutput::LocalNoop).unwrap()["phase"], "local_noop");
    }
}
