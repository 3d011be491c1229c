//! Type registry: payload layouts, standard patterns and their verification.
//!
//! Every registered type can allocate a buffer of `n` elements, fill it with
//! the *standard pattern* for a seed, and check a buffer against that
//! pattern. Element `i` of an `n`-element buffer seeded with `seed` holds
//! `seed * n + i`, converted into the element's scalar type. Structured types
//! store the same value in every field, each converted to the field's type.
//!
//! Buffers are packed little-endian byte vectors, so a transport can move
//! them without knowing the element type.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{SuiteError, SuiteResult, VerificationFailure};

/// Identifier of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(pub usize);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scalar building block of every layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scalar {
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 64-bit integer.
    U64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

/// A decoded scalar, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ScalarValue {
    /// Any signed integer.
    Int(i64),
    /// Any unsigned integer.
    UInt(u64),
    /// Any float.
    Float(f64),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::UInt(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
        }
    }
}

fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl Scalar {
    /// Size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::I64 | Scalar::U64 | Scalar::F64 => 8,
        }
    }

    /// Store `value` into `out`, wrapping integers and casting floats.
    fn encode(self, value: i64, out: &mut [u8]) {
        match self {
            Scalar::I8 => out.copy_from_slice(&(value as i8).to_le_bytes()),
            Scalar::U8 => out.copy_from_slice(&(value as u8).to_le_bytes()),
            Scalar::I16 => out.copy_from_slice(&(value as i16).to_le_bytes()),
            Scalar::U16 => out.copy_from_slice(&(value as u16).to_le_bytes()),
            Scalar::I32 => out.copy_from_slice(&(value as i32).to_le_bytes()),
            Scalar::U32 => out.copy_from_slice(&(value as u32).to_le_bytes()),
            Scalar::I64 => out.copy_from_slice(&value.to_le_bytes()),
            Scalar::U64 => out.copy_from_slice(&(value as u64).to_le_bytes()),
            Scalar::F32 => out.copy_from_slice(&(value as f32).to_le_bytes()),
            Scalar::F64 => out.copy_from_slice(&(value as f64).to_le_bytes()),
        }
    }

    /// Read a value back for diagnostics.
    pub fn decode(self, bytes: &[u8]) -> ScalarValue {
        match self {
            Scalar::I8 => ScalarValue::Int(i8::from_le_bytes(le(bytes)) as i64),
            Scalar::U8 => ScalarValue::UInt(u8::from_le_bytes(le(bytes)) as u64),
            Scalar::I16 => ScalarValue::Int(i16::from_le_bytes(le(bytes)) as i64),
            Scalar::U16 => ScalarValue::UInt(u16::from_le_bytes(le(bytes)) as u64),
            Scalar::I32 => ScalarValue::Int(i32::from_le_bytes(le(bytes)) as i64),
            Scalar::U32 => ScalarValue::UInt(u32::from_le_bytes(le(bytes)) as u64),
            Scalar::I64 => ScalarValue::Int(i64::from_le_bytes(le(bytes))),
            Scalar::U64 => ScalarValue::UInt(u64::from_le_bytes(le(bytes))),
            Scalar::F32 => ScalarValue::Float(f32::from_le_bytes(le(bytes)) as f64),
            Scalar::F64 => ScalarValue::Float(f64::from_le_bytes(le(bytes))),
        }
    }
}

/// A named member of a structured type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Member name, reported on mismatches.
    pub name: &'static str,
    /// Member type.
    pub scalar: Scalar,
}

/// Whether a type is a single scalar or a struct of scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeClass {
    /// One scalar per element.
    Primitive,
    /// Several packed scalars per element.
    Struct,
}

/// Memory layout of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// A single scalar.
    Primitive(Scalar),
    /// Packed fields, in declaration order.
    Struct(&'static [Field]),
}

impl Layout {
    /// Bytes per element.
    pub fn extent(&self) -> usize {
        match self {
            Layout::Primitive(scalar) => scalar.size(),
            Layout::Struct(fields) => fields.iter().map(|f| f.scalar.size()).sum(),
        }
    }
}

/// Description of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Stable id.
    pub id: TypeId,
    /// Name used in configuration and reports.
    pub name: &'static str,
    /// Element layout.
    pub layout: Layout,
}

impl TypeDescriptor {
    /// Primitive or structured.
    pub fn class(&self) -> TypeClass {
        match self.layout {
            Layout::Primitive(_) => TypeClass::Primitive,
            Layout::Struct(_) => TypeClass::Struct,
        }
    }

    /// Visit every scalar slot of one element as `(field name, scalar, byte offset)`.
    fn slots(&self) -> Vec<(Option<&'static str>, Scalar, usize)> {
        match self.layout {
            Layout::Primitive(scalar) => vec![(None, scalar, 0)],
            Layout::Struct(fields) => {
                let mut offset = 0;
                fields
                    .iter()
                    .map(|field| {
                        let slot = (Some(field.name), field.scalar, offset);
                        offset += field.scalar.size();
                        slot
                    })
                    .collect()
            }
        }
    }
}

/// An owned buffer of `count` elements of one registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedBuffer {
    type_id: TypeId,
    count: usize,
    bytes: Vec<u8>,
}

impl TypedBuffer {
    /// Type of the elements.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Raw bytes, for sending.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw bytes, for receiving.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// First element where a buffer diverges from the standard pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternMismatch {
    /// Element index.
    pub index: usize,
    /// Field name for structured types.
    pub field: Option<&'static str>,
    /// Value the pattern prescribes.
    pub expected: ScalarValue,
    /// Value found.
    pub actual: ScalarValue,
}

impl From<PatternMismatch> for VerificationFailure {
    fn from(m: PatternMismatch) -> Self {
        VerificationFailure::Payload {
            index: m.index,
            field: m.field,
            expected: m.expected,
            actual: m.actual,
        }
    }
}

impl From<PatternMismatch> for SuiteError {
    fn from(m: PatternMismatch) -> Self {
        SuiteError::Verification(m.into())
    }
}

/// Value of element `index` in an `count`-element buffer seeded with `seed`.
pub fn standard_value(seed: i64, count: usize, index: usize) -> i64 {
    seed.wrapping_mul(count as i64).wrapping_add(index as i64)
}

const STRUCT_INT_DOUBLE: &[Field] = &[
    Field {
        name: "a",
        scalar: Scalar::I32,
    },
    Field {
        name: "b",
        scalar: Scalar::F64,
    },
];

const STRUCT_MIXED: &[Field] = &[
    Field {
        name: "c",
        scalar: Scalar::I8,
    },
    Field {
        name: "s",
        scalar: Scalar::I16,
    },
    Field {
        name: "i",
        scalar: Scalar::I32,
    },
    Field {
        name: "l",
        scalar: Scalar::I64,
    },
    Field {
        name: "f",
        scalar: Scalar::F32,
    },
    Field {
        name: "d",
        scalar: Scalar::F64,
    },
];

const STANDARD_TYPES: &[(&str, Layout)] = &[
    ("char", Layout::Primitive(Scalar::I8)),
    ("unsigned_char", Layout::Primitive(Scalar::U8)),
    ("signed_char", Layout::Primitive(Scalar::I8)),
    ("short", Layout::Primitive(Scalar::I16)),
    ("unsigned_short", Layout::Primitive(Scalar::U16)),
    ("int", Layout::Primitive(Scalar::I32)),
    ("unsigned", Layout::Primitive(Scalar::U32)),
    ("long", Layout::Primitive(Scalar::I64)),
    ("unsigned_long", Layout::Primitive(Scalar::U64)),
    ("float", Layout::Primitive(Scalar::F32)),
    ("double", Layout::Primitive(Scalar::F64)),
    ("byte", Layout::Primitive(Scalar::U8)),
    ("struct_int_double", Layout::Struct(STRUCT_INT_DOUBLE)),
    ("struct_mixed", Layout::Struct(STRUCT_MIXED)),
];

/// Process-wide table of supported types. Immutable after construction.
#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
    by_name: HashMap<&'static str, TypeId>,
}

impl TypeRegistry {
    fn build() -> Self {
        let types: Vec<TypeDescriptor> = STANDARD_TYPES
            .iter()
            .enumerate()
            .map(|(idx, (name, layout))| TypeDescriptor {
                id: TypeId(idx),
                name: *name,
                layout: *layout,
            })
            .collect();
        let by_name = types.iter().map(|t| (t.name, t.id)).collect();
        Self { types, by_name }
    }

    /// The shared registry, built on first use.
    pub fn standard() -> &'static TypeRegistry {
        static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();
        REGISTRY.get_or_init(TypeRegistry::build)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.iter()
    }

    /// Look up a descriptor. Unknown ids are a configuration error.
    pub fn get(&self, id: TypeId) -> SuiteResult<&TypeDescriptor> {
        self.types
            .get(id.0)
            .ok_or_else(|| SuiteError::Configuration(format!("unknown type id {id}")))
    }

    /// Look up a type by name.
    pub fn lookup(&self, name: &str) -> SuiteResult<TypeId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SuiteError::Configuration(format!("unknown type '{name}'")))
    }

    /// Allocate a zeroed buffer for `count` elements.
    pub fn allocate(&self, id: TypeId, count: usize) -> SuiteResult<TypedBuffer> {
        let descriptor = self.get(id)?;
        let len = descriptor
            .layout
            .extent()
            .checked_mul(count)
            .ok_or_else(|| {
                SuiteError::Resource(format!("{count} elements of {} overflow", descriptor.name))
            })?;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|e| {
            SuiteError::Resource(format!(
                "out of memory allocating {count} x {}: {e}",
                descriptor.name
            ))
        })?;
        bytes.resize(len, 0);
        Ok(TypedBuffer {
            type_id: id,
            count,
            bytes,
        })
    }

    /// Fill `buffer` with the standard pattern for `seed`.
    pub fn set_standard_pattern(&self, buffer: &mut TypedBuffer, seed: i64) -> SuiteResult<()> {
        let descriptor = self.get(buffer.type_id)?;
        let extent = descriptor.layout.extent();
        let slots = descriptor.slots();
        let count = buffer.count;
        for (index, element) in buffer.bytes.chunks_exact_mut(extent).enumerate() {
            let value = standard_value(seed, count, index);
            for (_, scalar, offset) in &slots {
                scalar.encode(value, &mut element[*offset..*offset + scalar.size()]);
            }
        }
        Ok(())
    }

    /// Compare `buffer` against the standard pattern for `expected_seed`.
    ///
    /// The outer result reports configuration problems; the inner one the
    /// first diverging element, if any.
    pub fn check_standard_pattern(
        &self,
        buffer: &TypedBuffer,
        expected_seed: i64,
    ) -> SuiteResult<Result<(), PatternMismatch>> {
        let descriptor = self.get(buffer.type_id)?;
        let extent = descriptor.layout.extent();
        let slots = descriptor.slots();
        let mut expected = [0u8; 8];
        for (index, element) in buffer.bytes.chunks_exact(extent).enumerate() {
            let value = standard_value(expected_seed, buffer.count, index);
            for (field, scalar, offset) in &slots {
                let size = scalar.size();
                let actual = &element[*offset..*offset + size];
                scalar.encode(value, &mut expected[..size]);
                if actual != &expected[..size] {
                    return Ok(Err(PatternMismatch {
                        index,
                        field: *field,
                        expected: scalar.decode(&expected[..size]),
                        actual: scalar.decode(actual),
                    }));
                }
            }
        }
        Ok(Ok(()))
    }

    /// Release a buffer.
    pub fn free(&self, buffer: TypedBuffer) {
        drop(buffer);
    }
}
