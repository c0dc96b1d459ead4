//! # Decoding Engine
//!
//! Entry point for callers: `(bytes, context) -> DecodeOutcome`. The engine
//! looks up the device's unit in the injected registry, runs it, and
//! normalizes the record into measurements. Every failure comes back as a
//! value; a panicking unit is caught and reported as `UnitFault`, so one bad
//! payload never ends a stream.

use crate::config::EngineConfig;
use crate::constants::{WARN_THROTTLE_CAP, WARN_THROTTLE_WINDOW};
use crate::error::{DecodeError, DecodeWarning};
use crate::normalize::{Measurement, Normalizer};
use crate::payload::{DecodeContext, RawPayload};
use crate::registry::DecoderRegistry;
use crate::unit::{DecodingUnit, RawPassthroughUnit};
use crate::util::logging::{log_payload_hex, LogThrottle};
use log::{debug, error, log_enabled, warn, Level};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Result of one decode. Exactly one branch is populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecodeOutcome {
    Success {
        measurements: Vec<Measurement>,
        warnings: Vec<DecodeWarning>,
    },
    Failure {
        errors: Vec<DecodeError>,
    },
}

impl DecodeOutcome {
    fn failure(error: DecodeError) -> Self {
        DecodeOutcome::Failure {
            errors: vec![error],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DecodeOutcome::Success { .. })
    }

    pub fn measurements(&self) -> &[Measurement] {
        match self {
            DecodeOutcome::Success { measurements, .. } => measurements,
            DecodeOutcome::Failure { .. } => &[],
        }
    }

    pub fn warnings(&self) -> &[DecodeWarning] {
        match self {
            DecodeOutcome::Success { warnings, .. } => warnings,
            DecodeOutcome::Failure { .. } => &[],
        }
    }

    pub fn errors(&self) -> &[DecodeError] {
        match self {
            DecodeOutcome::Success { .. } => &[],
            DecodeOutcome::Failure { errors } => errors,
        }
    }

    /// Warning and error texts, for publishers that only carry strings.
    pub fn messages(&self) -> Vec<String> {
        match self {
            DecodeOutcome::Success { warnings, .. } => warnings.iter().map(|w| w.to_string()).collect(),
            DecodeOutcome::Failure { errors } => errors.iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Debug)]
pub struct Engine {
    registry: Arc<DecoderRegistry>,
    config: EngineConfig,
    normalizer: Normalizer,
    throttles: WarningThrottles,
}

/// One lock-free throttle per kind of repeated engine message.
#[derive(Debug)]
struct WarningThrottles {
    unrecognized_device: LogThrottle,
    unit_warnings: LogThrottle,
    unit_failures: LogThrottle,
}

impl WarningThrottles {
    fn new() -> Self {
        let throttle = || LogThrottle::new(WARN_THROTTLE_WINDOW, WARN_THROTTLE_CAP);
        Self {
            unrecognized_device: throttle(),
            unit_warnings: throttle(),
            unit_failures: throttle(),
        }
    }
}

impl Engine {
    pub fn new(registry: Arc<DecoderRegistry>, config: EngineConfig) -> Self {
        let normalizer = Normalizer::new(&config.normalizer);
        Self {
            registry,
            config,
            normalizer,
            throttles: WarningThrottles::new(),
        }
    }

    pub fn registry(&self) -> &Arc<DecoderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decode a payload with the unit assigned to `context.device_id`.
    pub fn decode(&self, bytes: &[u8], context: &DecodeContext) -> DecodeOutcome {
        if bytes.is_empty() {
            return DecodeOutcome::failure(DecodeError::EmptyPayload);
        }

        let mut warnings = Vec::new();
        let unit: Arc<dyn DecodingUnit> = match self.registry.lookup(&context.device_id) {
            Some(unit) => unit,
            None if self.config.passthrough_unknown => {
                if self.throttles.unrecognized_device.allow() {
                    warn!(
                        target: "mioty::engine",
                        "no decoding unit for device {}, passing payload through",
                        context.device_id
                    );
                }
                warnings.push(DecodeWarning::UnrecognizedDevice(context.device_id.clone()));
                Arc::new(RawPassthroughUnit)
            }
            None => {
                return DecodeOutcome::failure(DecodeError::UnrecognizedDevice(
                    context.device_id.clone(),
                ))
            }
        };

        match self.decode_with(unit.as_ref(), bytes, context) {
            DecodeOutcome::Success {
                measurements,
                warnings: unit_warnings,
            } => {
                warnings.extend(unit_warnings);
                DecodeOutcome::Success {
                    measurements,
                    warnings,
                }
            }
            failure => failure,
        }
    }

    /// Decode a payload with an explicit unit, bypassing the registry.
    pub fn decode_with(&self, unit: &dyn DecodingUnit, bytes: &[u8], context: &DecodeContext) -> DecodeOutcome {
        if bytes.is_empty() {
            return DecodeOutcome::failure(DecodeError::EmptyPayload);
        }

        let payload = RawPayload::from(bytes);
        log_payload_hex(&format!("{} port {}", context.device_id, context.port), bytes);
        debug!(
            target: "mioty::engine",
            "decoding {} bytes from {} with {} unit '{}'",
            bytes.len(),
            context.device_id,
            unit.kind(),
            unit.name()
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| unit.decode(&payload, context)))
            .unwrap_or_else(|panic| Err(DecodeError::UnitFault(panic_message(panic.as_ref()))));

        match result {
            Ok(output) => {
                if !output.warnings.is_empty() && self.throttles.unit_warnings.allow() {
                    for warning in &output.warnings {
                        warn!(target: "mioty::engine", "{} ({}): {}", context.device_id, unit.name(), warning);
                    }
                }
                let measurements = self.normalizer.normalize(&output.record);
                if log_enabled!(target: "mioty::engine", Level::Debug) {
                    debug!(
                        target: "mioty::engine",
                        "{}: {} measurements, {} warnings",
                        context.device_id,
                        measurements.len(),
                        output.warnings.len()
                    );
                }
                DecodeOutcome::Success {
                    measurements,
                    warnings: output.warnings,
                }
            }
            Err(err) => {
                match &err {
                    DecodeError::UnitFault(_) | DecodeError::Timeout { .. } => {
                        if self.throttles.unit_failures.allow() {
                            error!(target: "mioty::engine", "{} ({}): {}", context.device_id, unit.name(), err);
                        }
                    }
                    _ => debug!(target: "mioty::engine", "{} ({}): {}", context.device_id, unit.name(), err),
                }
                DecodeOutcome::failure(err)
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("decoding unit panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::MeasurementValue;
    use crate::unit::{UnitKind, UnitOutput};

    #[derive(Debug)]
    struct PanickingUnit;

    impl DecodingUnit for PanickingUnit {
        fn decode(&self, _payload: &RawPayload, _context: &DecodeContext) -> Result<UnitOutput, DecodeError> {
            panic!("index out of range");
        }

        fn kind(&self) -> UnitKind {
            UnitKind::Layout
        }

        fn name(&self) -> &str {
            "panicky"
        }
    }

    fn engine() -> Engine {
        Engine::new(
            Arc::new(DecoderRegistry::with_builtin_families().unwrap()),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_unknown_device_passes_through() {
        let outcome = engine().decode(&[0xAB, 0x01], &DecodeContext::new(1, "unknown"));
        let measurements = outcome.measurements();
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].name, "raw_hex");
        assert_eq!(measurements[0].value, MeasurementValue::Text("AB 01".into()));
        assert_eq!(measurements[0].unit, "hex");
        assert_eq!(
            outcome.warnings(),
            &[DecodeWarning::UnrecognizedDevice("unknown".into())]
        );
    }

    #[test]
    fn test_unknown_device_fails_without_passthrough() {
        let config = EngineConfig {
            passthrough_unknown: false,
            ..EngineConfig::default()
        };
        let engine = Engine::new(Arc::new(DecoderRegistry::new()), config);
        let outcome = engine.decode(&[0x01], &DecodeContext::new(1, "dev"));
        assert_eq!(outcome.errors(), &[DecodeError::UnrecognizedDevice("dev".into())]);
    }

    #[test]
    fn test_empty_payload_fails() {
        let outcome = engine().decode(&[], &DecodeContext::new(1, "dev"));
        assert_eq!(outcome.errors(), &[DecodeError::EmptyPayload]);
        assert!(outcome.measurements().is_empty());
    }

    #[test]
    fn test_panicking_unit_becomes_unit_fault() {
        let outcome = engine().decode_with(&PanickingUnit, &[0x01], &DecodeContext::new(1, "dev"));
        match outcome.errors() {
            [DecodeError::UnitFault(message)] => assert!(message.contains("index out of range")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let outcome = DecodeOutcome::failure(DecodeError::EmptyPayload);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failure");
        assert_eq!(outcome.messages(), vec!["Empty payload".to_string()]);
    }
}
