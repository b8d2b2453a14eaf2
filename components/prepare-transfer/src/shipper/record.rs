//! Log-server wire records.
//!
//! The log server is a Python `logging` socket listener: every record is a
//! pickled dict of `LogRecord` attributes preceded by its length as a 4-byte
//! big-endian integer. The server re-creates the record with
//! `logging.makeLogRecord` and files it under `project`, `rig_id` and
//! `comp_id`.

// External crates
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Level number of the start/stop marker records, between WARNING and ERROR.
pub const START_STOP_LEVELNO: u32 = 35;

/// Static identity attached to every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogServerIdentity {
    /// `project` of every record.
    pub project_name: String,
    /// Crate version.
    pub version: String,
    /// Rig name.
    pub rig_id: String,
    /// Acquisition computer name.
    pub comp_id: String,
}

/// Attributes of a Python `logging.LogRecord`, plus the log-server extras.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Logger name, the tracing target.
    pub name: String,
    /// Rendered message, see [`render_message`].
    pub msg: String,
    /// Always `None`; the message is preformatted.
    pub args: Option<()>,
    /// Python level name.
    pub levelname: String,
    /// Python level number.
    pub levelno: u32,
    /// Source file path.
    pub pathname: String,
    /// Source file name.
    pub filename: String,
    /// Source module name.
    pub module: String,
    /// Source line.
    pub lineno: u32,
    /// Last module path segment; tracing does not record function names.
    #[serde(rename = "funcName")]
    pub func_name: String,
    /// Seconds since the Unix epoch.
    pub created: f64,
    /// Millisecond part of `created`.
    pub msecs: f64,
    /// Milliseconds since the layer was created.
    #[serde(rename = "relativeCreated")]
    pub relative_created: f64,
    /// Thread identifier, if known.
    pub thread: Option<u64>,
    /// Thread name.
    #[serde(rename = "threadName")]
    pub thread_name: String,
    /// Process name.
    #[serde(rename = "processName")]
    pub process_name: String,
    /// Process identifier.
    pub process: u32,
    /// Always `None`.
    pub exc_info: Option<()>,
    /// Always `None`.
    pub exc_text: Option<String>,
    /// Always `None`.
    pub stack_info: Option<String>,
    /// Project name, see [`LogServerIdentity::project_name`].
    pub project: String,
    /// Rig name.
    pub rig_id: String,
    /// Acquisition computer name.
    pub comp_id: String,
    /// Crate version.
    pub version: String,
    /// Always `None`.
    pub extra: Option<()>,
}

/// Where and how a record was emitted.
#[derive(Debug, Clone)]
pub struct RecordSource<'a> {
    /// Tracing target, becomes the logger name.
    pub target: &'a str,
    /// Python level name, e.g. `WARNING` or `START_STOP`.
    pub levelname: &'a str,
    /// Python level number.
    pub levelno: u32,
    /// Source file, if known.
    pub file: Option<&'a str>,
    /// Source line, if known.
    pub line: Option<u32>,
    /// Module path, if known.
    pub module_path: Option<&'a str>,
}

impl LogRecord {
    /// Record for `message`, stamped with the current time.
    pub fn new(
        source: RecordSource<'_>,
        message: &str,
        context: &[(String, String)],
        identity: &LogServerIdentity,
        relative_ms: f64,
    ) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let pathname = source.file.unwrap_or("<unknown>").to_string();
        let filename = pathname
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&pathname)
            .to_string();
        let module = filename
            .strip_suffix(".rs")
            .unwrap_or(&filename)
            .to_string();
        let func_name = source
            .module_path
            .and_then(|m| m.rsplit("::").next())
            .unwrap_or("<module>")
            .to_string();

        Self {
            name: source.target.to_string(),
            msg: to_ascii(&render_message(message, context)),
            args: None,
            levelname: source.levelname.to_string(),
            levelno: source.levelno,
            pathname,
            filename,
            module,
            lineno: source.line.unwrap_or(0),
            func_name,
            created,
            msecs: (created.fract() * 1000.0).floor(),
            relative_created: relative_ms,
            thread: None,
            thread_name: std::thread::current()
                .name()
                .unwrap_or("MainThread")
                .to_string(),
            process_name: "MainProcess".to_string(),
            process: std::process::id(),
            exc_info: None,
            exc_text: None,
            stack_info: None,
            project: identity.project_name.clone(),
            rig_id: identity.rig_id.clone(),
            comp_id: identity.comp_id.clone(),
            version: identity.version.clone(),
            extra: None,
        }
    }

    /// Length-prefixed pickle, ready to write to the socket.
    pub fn to_frame(&self) -> Result<Bytes, serde_pickle::Error> {
        let payload = serde_pickle::to_vec(self, serde_pickle::SerOptions::new())?;
        let mut frame = BytesMut::with_capacity(payload.len() + 4);
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }
}

/// `message | {'key': 'value', ...}` as the log server expects.
pub fn render_message(message: &str, context: &[(String, String)]) -> String {
    let fields = context
        .iter()
        .map(|(k, v)| format!("'{}': '{}'", escape(k), escape(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{message} | {{{fields}}}")
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// The log database only stores ASCII; everything else becomes `?`.
pub fn to_ascii(s: &str) -> String {
    s.chars().map(|c| if c.is_ascii() { c } else { '?' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> LogServerIdentity {
        LogServerIdentity {
            project_name: "meso_prepare_transfer".to_string(),
            version: "0.3.0".to_string(),
            rig_id: "MESO.2".to_string(),
            comp_id: "W10DT000".to_string(),
        }
    }

    fn source() -> RecordSource<'static> {
        RecordSource {
            target: "meso_prepare_transfer::runtime::runtime",
            levelname: "INFO",
            levelno: 20,
            file: Some("components/prepare-transfer/src/runtime/runtime.rs"),
            line: Some(42),
            module_path: Some("meso_prepare_transfer::runtime::runtime"),
        }
    }

    #[test]
    fn message_carries_context_as_python_dict() {
        let context = vec![
            ("session_id".to_string(), "20000001".to_string()),
            ("username".to_string(), "O'Neil".to_string()),
        ];
        assert_eq!(
            render_message("Processing dataset", &context),
            "Processing dataset | {'session_id': '20000001', 'username': 'O\\'Neil'}"
        );
        assert_eq!(render_message("Bare", &[]), "Bare | {}");
    }

    #[test]
    fn non_ascii_is_replaced() {
        assert_eq!(to_ascii("Jérôme → done"), "J?r?me ? done");
    }

    #[test]
    fn record_derives_python_location_fields() {
        let record = LogRecord::new(source(), "hello", &[], &identity(), 12.5);
        assert_eq!(record.filename, "runtime.rs");
        assert_eq!(record.module, "runtime");
        assert_eq!(record.func_name, "runtime");
        assert_eq!(record.lineno, 42);
        assert_eq!(record.rig_id, "MESO.2");
        assert_eq!(record.msg, "hello | {}");
    }

    #[test]
    fn frame_is_length_prefixed_pickle() {
        let record = LogRecord::new(source(), "hello", &[], &identity(), 0.0);
        let frame = record.to_frame().unwrap();

        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(declared, frame.len() - 4);

        let decoded: serde_pickle::Value =
            serde_pickle::value_from_slice(&frame[4..], serde_pickle::DeOptions::new()).unwrap();
        let serde_pickle::Value::Dict(dict) = decoded else {
            panic!("record should pickle as a dict");
        };
        let key = serde_pickle::HashableValue::String("levelname".to_string());
        assert_eq!(
            dict.get(&key),
            Some(&serde_pickle::Value::String("INFO".to_string()))
        );
    }
}
