//! Emit module
//!
//! Converts raw records into normalized rows and writes them to a keyed
//! [`Sink`] with upsert semantics, so replaying a unit is harmless.

mod emitter;
mod sink;
mod transform;
mod types;

pub use emitter::Emitter;
pub use sink::{MemorySink, Sink};
pub use transform::{
    coerce, parse_datetime, to_snake_case, ChildMapping, ColumnMapping, FieldType,
    MappingTransformer, PassthroughTransformer, TableMapping, Transformer, DATETIME_FORMAT,
};
pub use types::{EmitReport, Row, RowOp};
