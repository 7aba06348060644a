//! Client runtime for a PostgreSQL driver.
//!
//! Two pieces:
//! - `pool`: a bounded, async connection pool that hands each connection to
//!   exactly one holder and quarantines broken sessions
//! - `registry` + `decode`: a per-type table of text and binary decoders and
//!   the per-column dispatch that picks between them
//!
//! Architecture:
//! - `types`: Type OIDs, format codes and decoded values
//! - `codec`: Built-in decoders for the well-known types
//! - `registry`: Runtime-mutable decoder table
//! - `decode`: Per-column dispatch with text fallback
//! - `protocol`: Result shapes produced by the wire layer
//! - `connection`: Connection traits and connection configuration
//! - `statement`: Prepared statement cache
//! - `pool`: Connection pool

pub mod codec;
pub mod connection;
pub mod decode;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod statement;
pub mod types;


pub use connection::{Connection, Connector, PgConfig};
pub use decode::{decode_column, decode_result, decode_row, result_formats, QueryResult, Row};
pub use error::{DecodeError, PgError, PgResult};
pub use pool::{PgPool, PgPoolConfig, PoolStatus, PooledConnection};
pub use protocol::{FieldDescription, RawResult, RawRow, SharedColumns};
pub use registry::{BinaryDecoders, DecodeFn, TranscoderEntry, TypeRegistry};
pub use statement::{PreparedStatement, StatementCache};
pub use types::{Format, Oid, PgValue};
