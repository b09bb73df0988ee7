//! Request sequence definition
//!
//! ```toml
//! sequence = [0x0C, 0x0D, 0x0C, 0x05]
//!
//! [[pid]]
//! id = 0x0C
//! length = 2
//! decode = "integer"
//! output = { kind = "scaled", key = "rpm", scale = 0.25 }
//! ```

use crate::error::ConfigError;
use crate::registry::{PidHandler, PidRegistry};
use obd_protocol::{DecodeMode, MAX_INTEGER_LENGTH};
use output_store::OutputWriter;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tracing::warn;

fn unit_scale() -> f64 {
    1.0
}

/// How a decoded value becomes an output value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputSpec {
    /// `value * scale + offset` over the whole payload
    Scaled {
        key: String,
        #[serde(default = "unit_scale")]
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
    /// `byte * scale + offset` for one payload byte
    Byte {
        key: String,
        index: usize,
        #[serde(default = "unit_scale")]
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
    /// The payload as hex or integer text
    Raw { key: String },
    /// `numerator / denominator * scale` from the last values of two other PIDs
    Ratio {
        key: String,
        numerator: u8,
        denominator: u8,
        #[serde(default = "unit_scale")]
        scale: f64,
    },
}

impl OutputSpec {
    /// Build the handler publishing through `writer`
    pub fn into_handler(self, writer: OutputWriter) -> PidHandler {
        match self {
            OutputSpec::Scaled { key, scale, offset } => Box::new(move |_, value, _| {
                writer.set(&key, json!(value.as_u64() as f64 * scale + offset));
            }),
            OutputSpec::Byte {
                key,
                index,
                scale,
                offset,
            } => Box::new(move |pid, value, _| match value.byte(index) {
                Some(b) => writer.set(&key, json!(f64::from(b) * scale + offset)),
                None => warn!("PID 0x{:02X} has no byte {} for {}", pid, index, key),
            }),
            OutputSpec::Raw { key } => Box::new(move |_, value, _| {
                writer.set(&key, json!(value.to_string()));
            }),
            OutputSpec::Ratio {
                key,
                numerator,
                denominator,
                scale,
            } => Box::new(move |_, _, cache| {
                let (Some(n), Some(d)) = (cache.get(numerator), cache.get(denominator)) else {
                    return;
                };
                let d = d.as_u64();
                if d != 0 {
                    writer.set(&key, json!(n.as_u64() as f64 / d as f64 * scale));
                }
            }),
        }
    }
}

/// One `[[pid]]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PidDefinition {
    pub id: u8,
    /// Payload bytes after the PID
    pub length: usize,
    #[serde(default)]
    pub decode: DecodeMode,
    #[serde(default)]
    pub output: Option<OutputSpec>,
}

/// Contents of the sequence file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SequenceDefinition {
    /// PIDs in request order; repeats poll a PID more often
    #[serde(default)]
    pub sequence: Vec<u8>,
    #[serde(default, rename = "pid")]
    pub pids: Vec<PidDefinition>,
}

impl SequenceDefinition {
    /// Parse and check a sequence file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let parse_error = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let definition: Self = config::Config::builder()
            .add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Toml,
            ))
            .build()
            .map_err(parse_error)?
            .try_deserialize()
            .map_err(parse_error)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Integer payloads must fit 64 bits
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.pids.iter().find(|pid| !pid.decode.fits(pid.length)) {
            Some(pid) => Err(ConfigError::InvalidValue {
                name: "length",
                reason: format!(
                    "PID 0x{:02X} decodes {} bytes as an integer, at most {} fit",
                    pid.id, pid.length, MAX_INTEGER_LENGTH
                ),
            }),
            None => Ok(()),
        }
    }

    /// Replace the registry contents with this definition
    pub fn apply(self, registry: &mut PidRegistry, writer: &OutputWriter) {
        registry.reset();
        for pid in self.pids {
            registry.set_response_length(pid.id, pid.length, pid.decode);
            if let Some(output) = pid.output {
                let handler = output.into_handler(writer.clone());
                registry.set_handler(pid.id, handler);
            }
        }
        for pid in self.sequence {
            if registry.spec(pid).is_none() {
                warn!("PID 0x{:02X} is polled but has no [[pid]] definition", pid);
            }
            registry.add_to_sequence(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::DecodedValue;
    use output_store::{ChannelBroadcaster, OutputStore, TracingLogger};
    use std::io::Write;
    use std::sync::Arc;

    fn writer() -> OutputWriter {
        OutputWriter::new(
            Arc::new(OutputStore::new()),
            Arc::new(ChannelBroadcaster::new(16)),
            Arc::new(TracingLogger),
        )
    }

    const SAMPLE: &str = r#"
sequence = [0x0C, 0x0D, 0x10, 0x0C]

[[pid]]
id = 0x0C
length = 2
decode = "integer"
output = { kind = "scaled", key = "rpm", scale = 0.25 }

[[pid]]
id = 0x0D
length = 1
decode = "integer"
output = { kind = "scaled", key = "speed" }

[[pid]]
id = 0x10
length = 2
decode = "integer"
output = { kind = "ratio", key = "maf_per_kmh", numerator = 0x10, denominator = 0x0D, scale = 0.01 }

[[pid]]
id = 0x05
length = 1
output = { kind = "byte", key = "coolant", index = 0, offset = -40 }
"#;

    #[test]
    fn test_load_and_apply() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let definition = SequenceDefinition::load(file.path()).unwrap();
        assert_eq!(definition.sequence, vec![0x0C, 0x0D, 0x10, 0x0C]);
        assert_eq!(definition.pids.len(), 4);
        assert_eq!(definition.pids[3].decode, DecodeMode::Bytes);

        let writer = writer();
        let mut registry = PidRegistry::new();
        definition.apply(&mut registry, &writer);
        assert_eq!(registry.sequence(), &[0x0C, 0x0D, 0x10, 0x0C]);

        registry.deliver(0x0C, &[0x1A, 0xF8]);
        assert_eq!(writer.get("rpm"), Some(json!(1726.0)));

        registry.deliver(0x0D, &[0x55]);
        assert_eq!(writer.get("speed"), Some(json!(85.0)));

        registry.deliver(0x05, &[0x7B]);
        assert_eq!(writer.get("coolant"), Some(json!(83.0)));
    }

    #[test]
    fn test_rejects_wide_integer() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(b"sequence = [0x02]\n\n[[pid]]\nid = 0x02\nlength = 9\ndecode = \"integer\"\n")
            .unwrap();
        assert!(matches!(
            SequenceDefinition::load(file.path()),
            Err(ConfigError::InvalidValue { name: "length", .. })
        ));

        // The same width as raw bytes is fine
        let definition = SequenceDefinition {
            sequence: vec![0x02],
            pids: vec![PidDefinition {
                id: 0x02,
                length: 9,
                decode: DecodeMode::Bytes,
                output: None,
            }],
        };
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_ratio_uses_cached_values() {
        let writer = writer();
        let mut registry = PidRegistry::new();
        registry.set_response_length(0x0D, 1, DecodeMode::Integer);
        registry.set_response_length(0x10, 2, DecodeMode::Integer);
        let ratio = OutputSpec::Ratio {
            key: "ratio".into(),
            numerator: 0x10,
            denominator: 0x0D,
            scale: 1.0,
        };
        registry.set_handler(0x0D, ratio.into_handler(writer.clone()));

        // Numerator not seen yet
        registry.deliver(0x0D, &[50]);
        assert_eq!(writer.get("ratio"), None);

        registry.deliver(0x10, &[0x01, 0xF4]);
        registry.deliver(0x0D, &[100]);
        // The handler runs before its own PID is cached: previous speed 50
        assert_eq!(writer.get("ratio"), Some(json!(10.0)));
        assert_eq!(
            registry.last_response(0x0D),
            Some(DecodedValue::Integer(100))
        );
    }

    #[test]
    fn test_raw_output() {
        let writer = writer();
        let mut handler = OutputSpec::Raw { key: "pids".into() }.into_handler(writer.clone());
        handler(
            0x00,
            &DecodedValue::Bytes(vec![0xBE, 0x3E, 0xB8, 0x11]),
            &Default::default(),
        );
        assert_eq!(writer.get("pids"), Some(json!("BE3EB811")));
    }

    #[test]
    fn test_apply_replaces_previous_definition() {
        let writer = writer();
        let mut registry = PidRegistry::new();
        registry.set_response_length(0x42, 2, DecodeMode::Integer);
        registry.add_to_sequence(0x42);

        SequenceDefinition {
            sequence: vec![0x0D],
            pids: vec![PidDefinition {
                id: 0x0D,
                length: 1,
                decode: DecodeMode::Integer,
                output: None,
            }],
        }
        .apply(&mut registry, &writer);

        assert_eq!(registry.sequence(), &[0x0D]);
        assert!(registry.spec(0x42).is_none());
    }
}
