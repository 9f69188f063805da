//! Module handles: where an infrastructure unit lives and how to drive it.

mod spec;

pub use spec::{ModuleSpec, VarMap, DEFAULT_BINARY};
