//! End-to-end engine behaviour: routing, passthrough, configuration and
//! loading units from disk.

use mioty_payload::{
    DecodeContext, DecodeError, DecodeOutcome, DecodeWarning, DecoderRegistry, Engine,
    EngineConfig, MeasurementValue, NormalizerConfig, ScriptConfig, UnitKind,
};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const RANGING_V1: &[u8] = &[0x11, 0x00, 0x0B, 0xB8, 0x78];

fn builtin_engine(config: EngineConfig) -> Engine {
    let registry = DecoderRegistry::with_builtin_families().unwrap();
    registry.assign("70B3D56770FF0001", "ranging").unwrap();
    Engine::new(Arc::new(registry), config)
}

fn numeric(outcome: &DecodeOutcome, name: &str) -> f64 {
    outcome
        .measurements()
        .iter()
        .find(|m| m.name == name)
        .and_then(|m| m.value.as_f64())
        .unwrap_or_else(|| panic!("no numeric measurement '{name}' in {outcome:?}"))
}

#[test]
fn assigned_device_decodes_with_its_family() {
    let engine = builtin_engine(EngineConfig::default());
    let outcome = engine.decode(RANGING_V1, &DecodeContext::new(1, "70b3d56770ff0001"));

    assert!(outcome.is_success(), "{outcome:?}");
    assert!(outcome.warnings().is_empty());
    assert_eq!(numeric(&outcome, "battery_voltage"), 3.0);
    assert_eq!(numeric(&outcome, "distance"), 120.0);
    assert_eq!(numeric(&outcome, "major_version"), 1.0);

    let battery = outcome
        .measurements()
        .iter()
        .find(|m| m.name == "battery_voltage")
        .unwrap();
    assert_eq!(battery.unit, "V");
    assert_eq!(battery.description, "Battery Voltage");
}

#[test]
fn unknown_device_is_passed_through_as_hex() {
    let engine = builtin_engine(EngineConfig::default());
    let outcome = engine.decode(&[0xDE, 0xAD, 0x01], &DecodeContext::new(7, "stranger"));

    assert!(outcome.is_success());
    assert_eq!(
        outcome.warnings(),
        &[DecodeWarning::UnrecognizedDevice("stranger".into())]
    );
    let [raw] = outcome.measurements() else {
        panic!("expected one measurement, got {outcome:?}");
    };
    assert_eq!(raw.name, "raw_hex");
    assert_eq!(raw.value, MeasurementValue::Text("DE AD 01".into()));
    assert_eq!(raw.unit, "hex");
}

#[test]
fn unknown_device_fails_when_passthrough_disabled() {
    let engine = builtin_engine(EngineConfig {
        passthrough_unknown: false,
        ..EngineConfig::default()
    });
    let outcome = engine.decode(&[1, 2], &DecodeContext::new(1, "stranger"));
    assert_eq!(
        outcome.errors(),
        &[DecodeError::UnrecognizedDevice("stranger".into())]
    );
}

#[test]
fn empty_payload_is_rejected_before_routing() {
    let engine = builtin_engine(EngineConfig::default());
    let outcome = engine.decode(&[], &DecodeContext::new(1, "70B3D56770FF0001"));
    assert_eq!(outcome.errors(), &[DecodeError::EmptyPayload]);
}

#[test]
fn failure_outcome_serializes_with_tag() {
    let engine = builtin_engine(EngineConfig::default());
    let outcome = engine.decode(&[0x11], &DecodeContext::new(1, "70B3D56770FF0001"));
    assert!(matches!(outcome.errors(), [DecodeError::TruncatedPayload { .. }]));

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["outcome"], "failure");
    assert_eq!(outcome.messages().len(), 1);
}

#[test]
fn registry_administration() {
    let registry = DecoderRegistry::with_builtin_families().unwrap();
    let names: Vec<String> = registry.units().into_iter().map(|u| u.name).collect();
    assert_eq!(names, ["energy_meter", "febris_th", "iolink_adapter", "juno_th", "ranging"]);

    assert!(matches!(
        registry.assign("dev", "missing"),
        Err(DecodeError::UnknownUnit(name)) if name == "missing"
    ));

    registry.assign(" dev-a ", "ranging").unwrap();
    registry.assign("dev-b", "febris_th").unwrap();
    assert_eq!(
        registry.assignments(),
        vec![
            ("DEV-A".to_string(), "ranging".to_string()),
            ("DEV-B".to_string(), "febris_th".to_string()),
        ]
    );
    assert_eq!(registry.lookup("Dev-A").unwrap().name(), "ranging");

    // Reassignment replaces the previous unit.
    registry.assign("dev-a", "juno_th").unwrap();
    assert_eq!(registry.lookup("dev-a").unwrap().name(), "juno_th");

    registry.remove_unit("febris_th").unwrap();
    assert!(registry.lookup("dev-b").is_none());
    assert_eq!(registry.assignments().len(), 1);
    assert!(registry.remove_unit("febris_th").is_err());

    assert!(registry.unassign("dev-a"));
    assert!(!registry.unassign("dev-a"));
}

#[test]
fn concurrent_decodes_share_one_engine() {
    let engine = Arc::new(builtin_engine(EngineConfig::default()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let device = if i % 2 == 0 { "70B3D56770FF0001" } else { "stranger" };
                (0..50)
                    .map(|_| engine.decode(RANGING_V1, &DecodeContext::new(1, device)))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let outcomes = handle.join().unwrap();
        let first = &outcomes[0];
        assert!(first.is_success());
        assert!(outcomes.iter().all(|o| o == first));
        // header (4) + battery + distance, or a single raw_hex
        let expected = if i % 2 == 0 { 6 } else { 1 };
        assert_eq!(first.measurements().len(), expected);
    }
}

#[test]
fn config_file_controls_engine() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.json");
    fs::write(
        &path,
        r#"{
            "passthrough_unknown": false,
            "script": { "timeout_ms": 250 },
            "normalizer": { "excluded_keys": ["base_id", "product_version"], "round_decimals": 1 }
        }"#,
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert!(!config.passthrough_unknown);
    assert_eq!(config.script.timeout_ms, 250);
    assert_eq!(config.script.recursion_limit, ScriptConfig::default().recursion_limit);
    assert_eq!(
        config.normalizer,
        NormalizerConfig {
            excluded_keys: vec!["base_id".into(), "product_version".into()],
            round_decimals: Some(1),
        }
    );

    let engine = builtin_engine(config);
    let outcome = engine.decode(RANGING_V1, &DecodeContext::new(1, "70B3D56770FF0001"));
    let names: Vec<&str> = outcome.measurements().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["major_version", "minor_version", "battery_voltage", "distance"]);
}

#[test]
fn malformed_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.json");
    fs::write(&path, "{ \"passthrough_unknown\": \"yes\" }").unwrap();
    assert!(EngineConfig::from_file(&path).is_err());
    assert!(EngineConfig::from_file(dir.path().join("missing.json")).is_err());
}

#[test]
fn units_load_from_directory_by_file_stem() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("door.json"),
        r#"{
            "name": "ignored",
            "header": false,
            "branches": [
                { "steps": [ { "group": { "fields": [
                    { "name": "open", "type": "u8" },
                    { "name": "battery_voltage", "type": "u16", "divisor": 1000.0 }
                ] } } ] }
            ]
        }"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("counter.js"),
        "// @version 0.3\nfunction Decoder(bytes, port) { return { pulses: bytes[0] * 256 + bytes[1] }; }",
    )
    .unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    fs::write(dir.path().join("empty.js"), "").unwrap();
    fs::write(dir.path().join("README.txt"), "not a unit").unwrap();

    let script = ScriptConfig {
        worker: Some(env!("CARGO_BIN_EXE_mioty-decode").into()),
        ..ScriptConfig::default()
    };
    let registry = DecoderRegistry::new();
    let loaded = registry.load_units_from_dir(dir.path(), &script).unwrap();
    assert_eq!(loaded, 2);

    let units = registry.units();
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].name, "counter");
    assert_eq!(units[0].kind, UnitKind::Script);
    assert_eq!(units[0].version.as_deref(), Some("0.3"));
    assert_eq!(units[1].name, "door");
    assert_eq!(units[1].kind, UnitKind::Layout);

    registry.assign("door-1", "door").unwrap();
    registry.assign("meter-1", "counter").unwrap();
    let engine = Engine::new(Arc::new(registry), EngineConfig::default());

    let door = engine.decode(&[0x01, 0x0C, 0x1C], &DecodeContext::new(1, "door-1"));
    assert_eq!(numeric(&door, "open"), 1.0);
    assert_eq!(numeric(&door, "battery_voltage"), 3.1);

    let meter = engine.decode(&[0x01, 0x02], &DecodeContext::new(1, "meter-1"));
    assert_eq!(numeric(&meter, "pulses"), 258.0);
}

#[test]
fn missing_units_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    let registry = DecoderRegistry::new();
    assert!(registry
        .load_units_from_dir(dir.path().join("nope"), &ScriptConfig::default())
        .is_err());
}
