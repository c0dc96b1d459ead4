//! # mioty-payload - Sandboxed Payload Decoding for Wireless Sensors and Meters
//!
//! The mioty-payload crate turns opaque uplink payloads from mioty/LoRa
//! sensors and energy meters into normalized `{name, value, unit, description}`
//! measurements.
//!
//! ## Features
//!
//! - Bounds-checked byte cursor with per-read endianness and exact 64-bit composition
//! - Declarative, versioned layouts: a two-byte version/feature header selects
//!   a branch, feature bits gate optional field groups, counted blocks are skipped
//! - Built-in families (`febris_th`, `juno_th`, `ranging`, `energy_meter`, `iolink_adapter`)
//!   and JSON blueprints
//! - JavaScript decoders (`Decoder(bytes, port)` / `decodeUplink(input)`) run in an
//!   isolated worker process with loop, recursion and wall-clock budgets
//! - Measurement normalization with unit/description inference
//! - Thread-safe device registry with raw passthrough for unknown devices
//!
//! ## Usage
//!
//! ```rust
//! use mioty_payload::{DecodeContext, DecoderRegistry, Engine, EngineConfig};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(DecoderRegistry::with_builtin_families().unwrap());
//! registry.assign("70B3D5E75E000001", "ranging").unwrap();
//!
//! let engine = Engine::new(registry, EngineConfig::default());
//! // v1.0 header, battery 3000 mV, distance 120 cm
//! let outcome = engine.decode(
//!     &[0x11, 0x00, 0x0B, 0xB8, 0x78],
//!     &DecodeContext::new(1, "70b3d5e75e000001"),
//! );
//! assert!(outcome.is_success());
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod layout;
pub mod logging;
pub mod normalize;
pub mod payload;
pub mod registry;
pub mod unit;
pub mod util;

pub use crate::config::{EngineConfig, NormalizerConfig, ScriptConfig};
pub use crate::engine::{DecodeOutcome, Engine};
pub use crate::error::{ConfigError, CursorError, DecodeError, DecodeWarning};
pub use crate::logging::{init_logger, log_error, log_info};

pub use layout::{
    families, ByteField, ByteLength, Condition, FieldSpec, FieldType, Group, Layout, LayoutStep,
    SkipBlock, VersionMatch,
};
pub use normalize::{Measurement, MeasurementValue, Normalizer};
pub use payload::{ByteCursor, DecodeContext, DecodedRecord, Endianness, FieldValue, HeaderFields, RawPayload};
pub use registry::DecoderRegistry;
pub use unit::{DecodingUnit, LayoutUnit, RawPassthroughUnit, ScriptUnit, UnitInfo, UnitKind, UnitOutput};
