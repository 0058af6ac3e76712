/// Environment detection
///
/// When the debuggee is reached through a transport that carries monitor
/// commands, the target's debugger is asked to identify itself and the
/// answer is classified into an `Environment`.

use crate::dprintln;
use crate::environment::Environment;
use crate::host::{DebugClient, ExecuteFlags, OutputControl, Result};
use crate::monitor::{MonitorBridge, VerboseOutput};

/// Monitor command asking the target debugger to describe itself
pub const PROBE_COMMAND: &str = "?";

/// Substring of a probe reply identifying one kind of target debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionRule {
    pub marker: &'static str,
    pub environment: Environment,
    pub label: &'static str,
}

/// Rules in priority order; the first marker found wins.
pub const DETECTION_RULES: &[DetectionRule] = &[
    DetectionRule {
        marker: "Rust Debugger",
        environment: Environment::Rust,
        label: "Rust UEFI Debugger",
    },
    DetectionRule {
        marker: "DXE UEFI Debugger",
        environment: Environment::Dxe,
        label: "DXE UEFI Debugger",
    },
];

/// Environment assumed when no rule matches
pub const FALLBACK_ENVIRONMENT: Environment = Environment::Dxe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Matched(&'static DetectionRule),
    Fallback,
}

impl Classification {
    pub fn environment(&self) -> Environment {
        match self {
            Classification::Matched(rule) => rule.environment,
            Classification::Fallback => FALLBACK_ENVIRONMENT,
        }
    }
}

pub fn classify(response: &str) -> Classification {
    DETECTION_RULES
        .iter()
        .find(|rule| response.contains(rule.marker))
        .map(Classification::Matched)
        .unwrap_or(Classification::Fallback)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// The transport cannot be probed; the environment was left alone.
    Skipped,
    Detected {
        classification: Classification,
        discovery_command: &'static str,
    },
}

/// Probe the target, update `environment` and start image discovery.
///
/// Only EXDI and GDB remote debuggees are probed. A single probe is sent; an
/// empty or unrecognized reply resolves to the DXE fallback. `environment` is
/// only written once every host call that can fail `init` has succeeded.
pub fn detect_and_initialize(
    client: &mut dyn DebugClient,
    environment: &mut Environment,
) -> Result<DetectionOutcome> {
    let debuggee = client.debuggee_type()?;
    let Some(bridge) = MonitorBridge::for_debuggee(&debuggee) else {
        log::debug!(
            "Debuggee {:?}/{:?} does not support monitor commands, skipping detection",
            debuggee.class,
            debuggee.qualifier
        );
        return Ok(DetectionOutcome::Skipped);
    };

    let classification = {
        let mut verbose = VerboseOutput::raise(client)?;
        let response = bridge.send(&mut *verbose, PROBE_COMMAND)?;
        log::debug!("Probe reply: {:?}", response.text());
        classify(response.text())
    };

    let detected = classification.environment();
    match classification {
        Classification::Matched(rule) => {
            log::info!("Detected {} ({})", rule.label, detected);
            dprintln!(client, "{} detected.", rule.label)?;
        }
        Classification::Fallback => {
            log::info!("Probe inconclusive, assuming {}", detected);
            dprintln!(client, "Unknown environment, assuming {}.", detected)?;
        }
    }

    let discovery_command = detected.discovery_command();
    dprintln!(client, "Scanning for images.")?;
    // Discovery is a convenience on top of detection; its failure does not fail `init`.
    if let Err(e) = client.execute(OutputControl::AllClients, discovery_command, ExecuteFlags::DEFAULT) {
        log::warn!("Image discovery '{}' failed: {}", discovery_command, e);
    }

    *environment = detected;
    Ok(DetectionOutcome::Detected {
        classification,
        discovery_command,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_marker_wins() {
        let classification = classify("UEFI Rust Debugger.\nException Type: Breakpoint");
        assert_eq!(classification.environment(), Environment::Rust);
        assert_eq!(classification, Classification::Matched(&DETECTION_RULES[0]));
    }

    #[test]
    fn test_rust_has_priority_over_dxe() {
        let classification = classify("DXE UEFI Debugger bridged to Rust Debugger");
        assert_eq!(classification.environment(), Environment::Rust);
    }

    #[test]
    fn test_dxe_marker() {
        let classification = classify("DXE UEFI Debugger v2");
        assert_eq!(classification, Classification::Matched(&DETECTION_RULES[1]));
        assert_eq!(classification.environment(), Environment::Dxe);
    }

    #[test]
    fn test_unrecognized_falls_back_to_dxe() {
        for reply in ["", "PEI something", "rust debugger"] {
            let classification = classify(reply);
            assert_eq!(classification, Classification::Fallback, "reply {:?}", reply);
            assert_eq!(classification.environment(), Environment::Dxe);
        }
    }
}
