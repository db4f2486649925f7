//! Query compilation for Granary.
//!
//! A query arrives as a declarative JSON descriptor ([`descriptor::QueryDoc`]),
//! is validated and canonicalized into a [`descriptor::QueryDescriptor`], and
//! is then assembled into engine SQL against either the raw event view or a
//! pre-aggregated rollup table ([`assemble`]). The canonical descriptor is the
//! sole input to the cache fingerprint ([`fingerprint`]).
//!
//! SQL is built exclusively from validated identifiers and typed literals; no
//! caller-supplied string ever reaches the engine verbatim.

pub mod assemble;
pub mod descriptor;
pub mod error;
pub mod fingerprint;
pub mod literal;
pub mod sanitize;
pub mod validate;

pub use assemble::{assemble, CompiledQuery, ResolvedSource, RollupSource};
pub use descriptor::{
    AggFunc, Direction, Operator, OrderKey, Predicate, QueryDescriptor, QueryDoc, Scalar,
    SelectItem,
};
pub use error::{CompileError, ValidationError};
pub use fingerprint::Fingerprint;
pub use validate::canonicalize;
