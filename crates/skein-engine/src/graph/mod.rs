//! Runtime graph: nodes with bound input values, the edges that carry
//! values between them, and the loader that builds both from a template.

pub mod edge;
pub mod loader;
pub mod node;
pub mod runtime;

pub use edge::RuntimeEdge;
pub use loader::{load, substitute_variables, system_variables};
pub use node::{NodeInput, NodeOutput, OutputTarget, RuntimeNode};
pub use runtime::{RuntimeGraph, SharedGraph};
