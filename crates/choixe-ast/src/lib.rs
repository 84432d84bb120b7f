//! Data tree and compiled AST for Choixe configuration templates.
//!
//! A configuration starts life as a [`Value`] tree (usually deserialized from
//! YAML or JSON), gets compiled into an immutable [`Node`] tree by
//! [`compile`], and is then evaluated by the `choixe-engine` crate against a
//! runtime context.

mod compiler;
mod node;
mod path;
mod value;

pub use compiler::*;
pub use node::*;
pub use path::*;
pub use value::*;
