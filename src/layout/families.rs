//! Built-in device families expressed as declarative layouts.
//!
//! New families should be added here (or shipped as JSON blueprints) rather
//! than as hand-written parsers.

use super::{
    ByteField, Condition, FieldSpec, FieldType, Group, Layout, LayoutStep, SkipBlock, VersionMatch,
};
use once_cell::sync::Lazy;

static BUILTIN_FAMILIES: Lazy<Vec<Layout>> =
    Lazy::new(|| {
        vec![
            febris_th(),
            juno_th(),
            ranging(),
            energy_meter(),
            iolink_adapter(),
        ]
    });

/// All built-in families, in registration order.
pub fn builtin_families() -> &'static [Layout] {
    &BUILTIN_FAMILIES
}

pub fn family(name: &str) -> Option<&'static Layout> {
    BUILTIN_FAMILIES.iter().find(|layout| layout.name == name)
}

fn temperature(name: &str) -> FieldSpec {
    FieldSpec::u16(name).scaled(10.0, 100.0)
}

fn battery() -> FieldSpec {
    FieldSpec::u16("battery_voltage")
        .scaled(1000.0, 0.0)
        .unit("V")
        .describe("Battery Voltage")
}

/// Environmental sensor (temperature/humidity, optional pressure and CO2).
pub fn febris_th() -> Layout {
    let prefix = || {
        LayoutStep::fields(vec![
            FieldSpec::u8("up_cnt").describe("Uplink Counter"),
            battery(),
            temperature("internal_temperature"),
        ])
    };

    Layout::new("febris_th")
        .describe("Environmental sensor with temperature, humidity, pressure and CO2")
        // firmware before 1.3 sends the prefix only
        .branch(VersionMatch::any().max_minor(2), vec![prefix()])
        .branch(
            VersionMatch::any().min_minor(3),
            vec![
                prefix(),
                LayoutStep::fields(vec![FieldSpec::u8("humidity")]),
                LayoutStep::fields(vec![
                    FieldSpec::u16("pressure").unit("hPa").describe("Pressure"),
                    FieldSpec::u16("co2_ppm").unit("ppm").describe("CO2"),
                ])
                .when(Condition::AnyFeature(0b0011))
                .otherwise(Group::Skip(4)),
                LayoutStep::fields(vec![FieldSpec::u8("alarm")]),
                LayoutStep::new(Group::SkipBlock(SkipBlock {
                    entry_width: 7,
                    reserved: 1,
                }))
                .named("fifo"),
                LayoutStep::fields(vec![temperature("dew_point")]).optional(),
                LayoutStep::fields(vec![
                    temperature("wall_temperature"),
                    temperature("therm_temperature"),
                    FieldSpec::u8("wall_humidity").unit("%RH").describe("Wall Humidity"),
                ])
                .when(Condition::Feature(2))
                .optional()
                .named("wall_sensor"),
            ],
        )
}

/// Presence/tilt sensor with an optional precision TH probe.
pub fn juno_th() -> Layout {
    let base = || {
        LayoutStep::fields(vec![
            FieldSpec::u8("up_cnt").describe("Uplink Counter"),
            battery(),
            FieldSpec::u8("internal_temperature").scaled(1.0, 128.0),
        ])
    };

    Layout::new("juno_th")
        .describe("Presence and tilt sensor with optional temperature/humidity probe")
        .branch(VersionMatch::any().max_minor(1), vec![base()])
        .branch(
            VersionMatch::any().min_minor(2),
            vec![
                base(),
                LayoutStep::fields(vec![
                    FieldSpec::u8("alarms").flags(&[
                        "temperatureMaxAlarm",
                        "temperatureMinAlarm",
                        "temperatureDeltaAlarm",
                        "humidityMaxAlarm",
                        "humidityMinAlarm",
                        "humidityDeltaAlarm",
                    ]),
                    temperature("temperature"),
                    FieldSpec::u8("humidity"),
                ])
                .when(Condition::Feature(0))
                .optional()
                .named("th_probe"),
                LayoutStep::fields(vec![
                    FieldSpec::u8("orientation"),
                    FieldSpec::u8("open_alarm"),
                    FieldSpec::u8("opened_since_sent"),
                    FieldSpec::u16("opened_since_boot"),
                ])
                .when(Condition::Feature(1))
                .optional()
                .named("tilt"),
            ],
        )
}

/// Distance/presence sensor. Firmware 2 moved to millimetre resolution.
pub fn ranging() -> Layout {
    let tail = || {
        vec![
            LayoutStep::fields(vec![FieldSpec::u8("presence").flags(&["occupied", "motion"])])
                .when(Condition::Feature(0))
                .optional(),
            LayoutStep::fields(vec![FieldSpec::new("signal_strength", FieldType::I8)
                .unit("dBm")
                .describe("Signal Strength")])
            .when(Condition::Feature(1))
            .optional(),
        ]
    };

    let mut legacy = vec![LayoutStep::fields(vec![
        battery(),
        FieldSpec::u8("distance").unit("cm").describe("Distance"),
    ])];
    legacy.extend(tail());

    let mut current = vec![LayoutStep::fields(vec![
        battery(),
        FieldSpec::u16("distance").little().unit("mm").describe("Distance"),
    ])];
    current.extend(tail());

    Layout::new("ranging")
        .describe("Presence and ranging sensor")
        .branch(VersionMatch::major(1), legacy)
        .branch(VersionMatch::any().min_major(2), current)
}

/// Electricity meter. Registers are little-endian on the wire.
pub fn energy_meter() -> Layout {
    Layout::new("energy_meter")
        .describe("Electricity meter with import/export registers")
        .branch(
            VersionMatch::major(1),
            vec![LayoutStep::fields(vec![
                FieldSpec::new("energy_import", FieldType::U32)
                    .little()
                    .unit("Wh")
                    .describe("Energy Import"),
                FieldSpec::new("active_power", FieldType::I16)
                    .little()
                    .unit("W")
                    .describe("Active Power"),
            ])],
        )
        .branch(
            VersionMatch::any().min_major(2),
            vec![
                LayoutStep::fields(vec![FieldSpec::new("energy_import", FieldType::U64)
                    .little()
                    .unit("Wh")
                    .describe("Energy Import")]),
                LayoutStep::fields(vec![FieldSpec::new("energy_export", FieldType::U64)
                    .little()
                    .unit("Wh")
                    .describe("Energy Export")])
                .when(Condition::Feature(0)),
                LayoutStep::fields(vec![FieldSpec::new("active_power", FieldType::I32)
                    .little()
                    .unit("W")
                    .describe("Active Power")]),
                LayoutStep::fields(vec![
                    FieldSpec::u16("voltage").little().scaled(10.0, 0.0).unit("V"),
                    FieldSpec::u16("current").little().scaled(1000.0, 0.0).unit("A"),
                ])
                .when(Condition::Feature(1)),
                LayoutStep::new(Group::SkipBlock(SkipBlock {
                    entry_width: 4,
                    reserved: 0,
                }))
                .when(Condition::Feature(2))
                .named("tariffs"),
                LayoutStep::fields(vec![FieldSpec::u16("frequency")
                    .little()
                    .scaled(100.0, 0.0)
                    .unit("Hz")
                    .describe("Grid Frequency")]),
            ],
        )
}

/// mioty IO-Link adapter: no version header, the process-data length is
/// announced in byte 1 and the frame ends with three event bytes and an
/// adapter event.
pub fn iolink_adapter() -> Layout {
    Layout::new("iolink_adapter")
        .describe("IO-Link adapter forwarding process data of an attached device")
        .without_header()
        .branch(
            VersionMatch::any(),
            vec![
                LayoutStep::fields(vec![
                    FieldSpec::u8("control").flags(&["bit_0", "bit_1", "bit_2", "bit_3"]),
                    FieldSpec::u8("pd_in_length")
                        .unit("bytes")
                        .describe("PD-in Length"),
                    FieldSpec::u16("vendor_id").describe("Vendor ID"),
                    FieldSpec::new("device_id", FieldType::U24).describe("Device ID"),
                ]),
                LayoutStep::new(Group::Bytes(
                    ByteField::sized_by("process_data", "pd_in_length")
                        .unit("hex")
                        .describe("Process Data"),
                ))
                .optional(),
                LayoutStep::new(Group::Bytes(
                    ByteField::fixed("event_data", 3)
                        .unit("hex")
                        .describe("Event Data"),
                ))
                .optional(),
                LayoutStep::fields(vec![FieldSpec::u8("adapter_event").describe("Adapter Event")])
                    .optional(),
            ],
        )
}
