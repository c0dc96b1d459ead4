//! # Script Units
//!
//! Externally supplied decoders written in JavaScript, in either of the two
//! conventions found in the field:
//!
//! ```javascript
//! // @name Door sensor
//! // @version 1.2
//! function decodeUplink(input) {
//!     return { data: { open: input.bytes[0] === 1 }, warnings: [], errors: [] };
//! }
//! ```
//!
//! or the older `function Decoder(bytes, port) { return {...}; }`.
//!
//! ## Sandbox
//!
//! Each invocation runs in a separate worker process (`mioty-decode
//! script-worker`) with an empty environment. The worker builds a fresh
//! `boa_engine` context with no console, module loader, filesystem, network
//! or process bindings, applies the loop-iteration and recursion limits, and
//! evaluates the unit against the payload passed in as literals.
//!
//! The job and its reply travel as JSON over the worker's stdin and stdout.
//! The caller waits at most the configured wall-clock budget and kills the
//! worker when it is exceeded, so a runaway script never outlives its decode.

use super::{DecodingUnit, UnitInfo, UnitKind, UnitOutput};
use crate::config::ScriptConfig;
use crate::constants::{
    SCRIPT_WORKER_BIN, SCRIPT_WORKER_COMMAND, SCRIPT_WORKER_ENV, SCRIPT_WORKER_STACK_SIZE,
};
use crate::error::{DecodeError, DecodeWarning};
use crate::payload::{DecodeContext, DecodedRecord, RawPayload};
use boa_engine::{Context, JsError, Source};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

/// Metadata tags read from `// @tag value` comment lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
}

impl ScriptMetadata {
    pub fn parse(source: &str) -> Self {
        let mut metadata = Self::default();
        for line in source.lines() {
            let Some(tag) = line.trim().strip_prefix("//").map(str::trim) else {
                continue;
            };
            let Some(tag) = tag.strip_prefix('@') else {
                continue;
            };
            let (key, value) = tag.split_once(char::is_whitespace).unwrap_or((tag, ""));
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key {
                "name" => &mut metadata.name,
                "version" => &mut metadata.version,
                "description" => &mut metadata.description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        metadata
    }
}

#[derive(Debug, Clone)]
pub struct ScriptUnit {
    name: String,
    source: Arc<str>,
    metadata: ScriptMetadata,
    limits: ScriptConfig,
}

#[derive(Deserialize)]
struct Envelope {
    kind: String,
    result: Value,
}

impl ScriptUnit {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        limits: ScriptConfig,
    ) -> Result<Self, DecodeError> {
        let name = name.into();
        let source: String = source.into();
        if source.trim().is_empty() {
            return Err(DecodeError::InvalidUnit(format!("{name}: empty script")));
        }
        if !declares_entry_point(&source) {
            return Err(DecodeError::InvalidUnit(format!(
                "{name}: no Decoder or decodeUplink entry point"
            )));
        }
        let metadata = ScriptMetadata::parse(&source);
        Ok(Self {
            name,
            source: source.into(),
            metadata,
            limits,
        })
    }

    pub fn metadata(&self) -> &ScriptMetadata {
        &self.metadata
    }

    /// Wrapper evaluated after the unit source. Inputs are embedded as JSON
    /// literals so nothing from the host is bound into the context.
    fn invocation(&self, payload: &RawPayload, context: &DecodeContext) -> Result<String, DecodeError> {
        let bytes = serde_json::to_string(payload.as_bytes())
            .map_err(|e| DecodeError::UnitFault(e.to_string()))?;
        let device = serde_json::to_string(&context.device_id)
            .map_err(|e| DecodeError::UnitFault(e.to_string()))?;
        Ok(format!(
            r#"(function () {{
    var input = {{ bytes: {bytes}, fPort: {port}, deviceId: {device} }};
    var kind, result;
    if (typeof decodeUplink === "function") {{
        kind = "uplink";
        result = decodeUplink(input);
    }} else if (typeof Decoder === "function") {{
        kind = "legacy";
        result = Decoder(input.bytes.slice(), input.fPort);
    }} else {{
        throw new Error("no Decoder or decodeUplink function defined");
    }}
    return JSON.stringify({{ kind: kind, result: result === undefined ? null : result }});
}})()"#,
            port = context.port,
        ))
    }

    fn interpret(&self, envelope: Envelope) -> Result<UnitOutput, DecodeError> {
        let mut warnings = Vec::new();
        let data = match envelope.kind.as_str() {
            "uplink" => {
                let Value::Object(mut result) = envelope.result else {
                    return Err(DecodeError::UnitFault(
                        "decodeUplink must return an object".into(),
                    ));
                };
                let errors = messages(result.get("errors"));
                if !errors.is_empty() {
                    return Err(DecodeError::UnitFault(errors.join("; ")));
                }
                warnings.extend(messages(result.get("warnings")).into_iter().map(DecodeWarning::Unit));
                result.remove("data").unwrap_or(Value::Null)
            }
            _ => envelope.result,
        };

        let (record, record_warnings) = DecodedRecord::from_json(&data).ok_or_else(|| {
            DecodeError::UnitFault(format!("{} returned {} instead of an object", self.name, type_name(&data)))
        })?;
        warnings.extend(record_warnings);
        Ok(UnitOutput { record, warnings })
    }
}

fn messages(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Whether `Decoder` or `decodeUplink` appears as an identifier outside
/// comments.
fn declares_entry_point(source: &str) -> bool {
    let code = strip_comments(source);
    ["decodeUplink", "Decoder"]
        .iter()
        .any(|name| contains_identifier(&code, name))
}

fn strip_comments(source: &str) -> String {
    let mut code = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find('/') {
        code.push_str(&rest[..start]);
        let after = &rest[start..];
        if let Some(line) = after.strip_prefix("//") {
            rest = line.find('\n').map_or("", |end| &line[end..]);
        } else if let Some(block) = after.strip_prefix("/*") {
            rest = block.find("*/").map_or("", |end| &block[end + 2..]);
            code.push(' ');
        } else {
            code.push('/');
            rest = &after[1..];
        }
    }
    code.push_str(rest);
    code
}

fn contains_identifier(code: &str, name: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    code.match_indices(name).any(|(at, _)| {
        let before = code[..at].chars().next_back();
        let after = code[at + name.len()..].chars().next();
        !before.map_or(false, is_ident) && !after.map_or(false, is_ident)
    })
}

/// One script invocation, sent to the worker process.
#[derive(Debug, Serialize, Deserialize)]
struct WorkerJob {
    source: String,
    invocation: String,
    loop_iteration_limit: u64,
    recursion_limit: usize,
}

/// Worker answer: the wrapper's JSON string or a classified fault.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
enum WorkerReply {
    Ok(String),
    LimitExceeded(String),
    Thrown(String),
}

fn classify(err: JsError, context: &mut Context<'_>) -> WorkerReply {
    // Thrown values are stringified the way JS would (`Error: message`).
    let message = match err.as_opaque() {
        Some(value) => value
            .to_string(context)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|_| err.to_string()),
        None => err.to_string(),
    };
    if message.to_ascii_lowercase().contains("loop iteration limit") {
        WorkerReply::LimitExceeded(message)
    } else {
        WorkerReply::Thrown(message)
    }
}

fn run_sandboxed(job: &WorkerJob) -> WorkerReply {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(job.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(job.recursion_limit);

    if let Err(err) = context.eval(Source::from_bytes(&job.source)) {
        return classify(err, &mut context);
    }
    let value = match context.eval(Source::from_bytes(&job.invocation)) {
        Ok(value) => value,
        Err(err) => return classify(err, &mut context),
    };
    match value.as_string() {
        Some(json) => WorkerReply::Ok(json.to_std_string_escaped()),
        None => WorkerReply::Thrown("script wrapper returned a non-string value".into()),
    }
}

/// Body of the `script-worker` subcommand: reads one job from `input`, runs
/// it and writes the reply to `output`.
pub fn run_worker(mut input: impl Read, mut output: impl Write) -> io::Result<()> {
    let job: WorkerJob = serde_json::from_reader(&mut input)?;
    let reply = thread::Builder::new()
        .name("mioty-interpreter".into())
        .stack_size(SCRIPT_WORKER_STACK_SIZE)
        .spawn(move || run_sandboxed(&job))?
        .join()
        .unwrap_or_else(|_| WorkerReply::Thrown("script interpreter panicked".into()));
    serde_json::to_writer(&mut output, &reply)?;
    output.flush()
}

/// Resolves the worker executable: configured path, then the environment
/// override, then `mioty-decode` itself or a `mioty-decode` next to the
/// running executable (or one directory up, for test binaries in `deps/`).
fn worker_executable(limits: &ScriptConfig) -> Result<PathBuf, DecodeError> {
    if let Some(path) = &limits.worker {
        return Ok(path.clone());
    }
    if let Some(path) = std::env::var_os(SCRIPT_WORKER_ENV) {
        return Ok(path.into());
    }
    let current = std::env::current_exe()
        .map_err(|e| DecodeError::UnitFault(format!("cannot locate script worker: {e}")))?;
    if current.file_stem().map_or(false, |stem| stem == SCRIPT_WORKER_BIN) {
        return Ok(current);
    }
    let file = format!("{SCRIPT_WORKER_BIN}{}", std::env::consts::EXE_SUFFIX);
    current
        .ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&file))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| DecodeError::UnitFault("no script worker executable found".into()))
}

/// Sends the job and collects everything the worker prints before exiting.
fn exchange(mut stdin: ChildStdin, mut stdout: ChildStdout, job: &WorkerJob) -> io::Result<String> {
    serde_json::to_writer(&mut stdin, job)?;
    // EOF on stdin lets the worker start.
    drop(stdin);
    let mut reply = String::new();
    stdout.read_to_string(&mut reply)?;
    Ok(reply)
}

impl DecodingUnit for ScriptUnit {
    fn decode(&self, payload: &RawPayload, context: &DecodeContext) -> Result<UnitOutput, DecodeError> {
        let job = WorkerJob {
            source: self.source.to_string(),
            invocation: self.invocation(payload, context)?,
            loop_iteration_limit: self.limits.loop_iteration_limit,
            recursion_limit: self.limits.recursion_limit,
        };
        let budget = self.limits.timeout();
        let worker = worker_executable(&self.limits)?;

        let mut child = Command::new(&worker)
            .arg(SCRIPT_WORKER_COMMAND)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                DecodeError::UnitFault(format!("cannot start script worker {}: {e}", worker.display()))
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DecodeError::UnitFault("script worker has no pipes".into()));
        };

        let (tx, rx) = mpsc::channel();
        let io_thread = thread::Builder::new()
            .name(format!("mioty-script-{}", self.name))
            .spawn(move || {
                let _ = tx.send(exchange(stdin, stdout, &job));
            });
        let io_thread = match io_thread {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DecodeError::UnitFault(format!("cannot start script worker: {e}")));
            }
        };

        let received = rx.recv_timeout(budget);
        if received.is_err() {
            // Closing the pipes also releases the i/o thread.
            let _ = child.kill();
        }
        let status = child.wait();
        let _ = io_thread.join();

        let reply = match received {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                error!(target: "mioty::script", "{}: worker i/o failed: {}", self.name, e);
                return Err(DecodeError::UnitFault(format!("script worker i/o failed: {e}")));
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    target: "mioty::script",
                    "{}: no result within {:?}, worker killed",
                    self.name, budget
                );
                return Err(DecodeError::Timeout {
                    unit: self.name.clone(),
                    budget,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!(target: "mioty::script", "{}: script worker i/o thread died", self.name);
                return Err(DecodeError::UnitFault("script worker terminated unexpectedly".into()));
            }
        };

        let reply: WorkerReply = serde_json::from_str(&reply).map_err(|_| {
            let status = status.map_or_else(|e| e.to_string(), |s| s.to_string());
            error!(target: "mioty::script", "{}: worker exited ({}) without a reply", self.name, status);
            DecodeError::UnitFault(format!("script worker exited ({status}) without a reply"))
        })?;

        match reply {
            WorkerReply::Ok(json) => {
                debug!(target: "mioty::script", "{}: returned {} bytes of JSON", self.name, json.len());
                let envelope: Envelope = serde_json::from_str(&json)
                    .map_err(|e| DecodeError::UnitFault(format!("malformed script result: {e}")))?;
                self.interpret(envelope)
            }
            WorkerReply::LimitExceeded(message) => {
                warn!(target: "mioty::script", "{}: {}", self.name, message);
                Err(DecodeError::Timeout {
                    unit: self.name.clone(),
                    budget,
                })
            }
            WorkerReply::Thrown(message) => {
                debug!(target: "mioty::script", "{}: {}", self.name, message);
                Err(DecodeError::UnitFault(message))
            }
        }
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Script
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> UnitInfo {
        UnitInfo {
            name: self.name.clone(),
            kind: UnitKind::Script,
            version: self.metadata.version.clone(),
            description: self
                .metadata
                .description
                .clone()
                .or_else(|| self.metadata.name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_tags() {
        let source = "// @name Febris TH\n//   @version 2.1\n// @description Environmental sensor\n// @author someone\nfunction Decoder(b, p) { return {}; }";
        let metadata = ScriptMetadata::parse(source);
        assert_eq!(metadata.name.as_deref(), Some("Febris TH"));
        assert_eq!(metadata.version.as_deref(), Some("2.1"));
        assert_eq!(metadata.description.as_deref(), Some("Environmental sensor"));
    }

    #[test]
    fn test_rejects_script_without_entry_point() {
        let err = ScriptUnit::new("x", "var a = 1;", ScriptConfig::default()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUnit(_)));
        assert!(ScriptUnit::new("x", "   ", ScriptConfig::default()).is_err());
    }

    #[test]
    fn test_entry_point_must_be_code() {
        for source in [
            "// no Decoder here\nvar a = 1;",
            "/* decodeUplink(input) is not defined */ var a = 1;",
            "var DecoderTable = {}; function myDecoder(b) {}",
        ] {
            assert!(!declares_entry_point(source), "{source}");
            assert!(ScriptUnit::new("x", source, ScriptConfig::default()).is_err());
        }

        for source in [
            "var Decoder = function (b, p) { return {}; };",
            "// @version 1\nfunction decodeUplink(input) { return { data: {} }; }",
            "var ratio = 4 / 2; /* helper */ function Decoder(b, p) { return { r: ratio }; }",
        ] {
            assert!(declares_entry_point(source), "{source}");
        }
    }

    #[test]
    fn test_worker_runs_job_from_stdin() {
        let job = WorkerJob {
            source: "function Decoder(b, p) { return { sum: b[0] + b[1] }; }".into(),
            invocation: "JSON.stringify(Decoder([2, 3], 1))".into(),
            loop_iteration_limit: 1_000,
            recursion_limit: 64,
        };
        let input = serde_json::to_vec(&job).unwrap();
        let mut output = Vec::new();
        run_worker(input.as_slice(), &mut output).unwrap();
        let reply: WorkerReply = serde_json::from_slice(&output).unwrap();
        assert_eq!(reply, WorkerReply::Ok(r#"{"sum":5}"#.into()));

        let job = WorkerJob {
            source: "function Decoder(b, p) { for (;;) {} }".into(),
            invocation: "Decoder([], 1)".into(),
            loop_iteration_limit: 100,
            recursion_limit: 64,
        };
        let input = serde_json::to_vec(&job).unwrap();
        let mut output = Vec::new();
        run_worker(input.as_slice(), &mut output).unwrap();
        let reply: WorkerReply = serde_json::from_slice(&output).unwrap();
        assert!(matches!(reply, WorkerReply::LimitExceeded(_)), "{reply:?}");
    }

    #[test]
    fn test_worker_reply_wire_format() {
        let json = serde_json::to_string(&WorkerReply::Thrown("Error: boom".into())).unwrap();
        assert_eq!(json, r#"{"status":"thrown","message":"Error: boom"}"#);
    }

    #[test]
    fn test_configured_worker_wins() {
        let limits = ScriptConfig {
            worker: Some(PathBuf::from("/opt/mioty/mioty-decode")),
            ..ScriptConfig::default()
        };
        assert_eq!(
            worker_executable(&limits).unwrap(),
            PathBuf::from("/opt/mioty/mioty-decode")
        );
    }

    #[test]
    fn test_interpret_uplink_envelope() {
        let unit = ScriptUnit::new("u", "function decodeUplink(i) {}", ScriptConfig::default()).unwrap();
        let envelope = Envelope {
            kind: "uplink".into(),
            result: serde_json::json!({
                "data": { "temperature": 21.5 },
                "warnings": ["low battery"]
            }),
        };
        let output = unit.interpret(envelope).unwrap();
        assert!(output.record.contains("temperature"));
        assert_eq!(output.warnings, vec![DecodeWarning::Unit("low battery".into())]);

        let failing = Envelope {
            kind: "uplink".into(),
            result: serde_json::json!({ "errors": ["bad frame"] }),
        };
        assert_eq!(
            unit.interpret(failing).unwrap_err(),
            DecodeError::UnitFault("bad frame".into())
        );
    }

    #[test]
    fn test_interpret_rejects_non_object() {
        let unit = ScriptUnit::new("u", "function Decoder(b, p) {}", ScriptConfig::default()).unwrap();
        let envelope = Envelope {
            kind: "legacy".into(),
            result: serde_json::json!(42),
        };
        assert!(matches!(unit.interpret(envelope), Err(DecodeError::UnitFault(_))));
    }
}
