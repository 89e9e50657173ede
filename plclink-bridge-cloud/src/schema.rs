//! Bus payload shapes.
//!
//! Two generations of producers share the bus. Older ones wrap the point
//! values in an envelope (`{"timestamp": ..., "values": {...}}`), newer ones
//! may publish the values object directly. Shapes are tried in priority
//! order and the first match supplies the field source.

use serde_json::{Map, Value};

use crate::error::{RelayError, kind_of};

/// One recognized payload shape.
pub trait SchemaVariant: Send + Sync {
    fn name(&self) -> &'static str;

    /// The field source, if `message` has this shape.
    fn fields<'a>(&self, message: &'a Map<String, Value>) -> Option<&'a Map<String, Value>>;
}

/// `{"values": {...}}`, with or without a timestamp.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeSchema;

impl SchemaVariant for EnvelopeSchema {
    fn name(&self) -> &'static str {
        "envelope"
    }

    fn fields<'a>(&self, message: &'a Map<String, Value>) -> Option<&'a Map<String, Value>> {
        message.get("values").and_then(Value::as_object)
    }
}

/// Any object: the message itself is the field source.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatSchema;

impl SchemaVariant for FlatSchema {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn fields<'a>(&self, message: &'a Map<String, Value>) -> Option<&'a Map<String, Value>> {
        Some(message)
    }
}

/// A message resolved to its field source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized<'a> {
    /// Name of the matching shape
    pub schema: &'static str,
    pub fields: &'a Map<String, Value>,
}

/// Ordered list of shapes.
pub struct SchemaDetector {
    variants: Vec<Box<dyn SchemaVariant>>,
}

impl Default for SchemaDetector {
    /// Envelope first, then flat.
    fn default() -> Self {
        Self::new(vec![Box::new(EnvelopeSchema), Box::new(FlatSchema)])
    }
}

impl SchemaDetector {
    pub fn new(variants: Vec<Box<dyn SchemaVariant>>) -> Self {
        Self { variants }
    }

    /// Pick the field source of a parsed message. Non-objects are rejected.
    pub fn normalize<'a>(&self, message: &'a Value) -> Result<Normalized<'a>, RelayError> {
        let object = message
            .as_object()
            .ok_or_else(|| RelayError::UnsupportedShape(kind_of(message)))?;

        self.variants
            .iter()
            .find_map(|variant| {
                variant.fields(object).map(|fields| Normalized {
                    schema: variant.name(),
                    fields,
                })
            })
            .ok_or(RelayError::UnsupportedShape("object"))
    }
}
