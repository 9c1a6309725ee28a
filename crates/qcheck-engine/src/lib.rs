//! Engine binding for the query conformance harness.
//!
//! The harness never talks to a native engine directly. It goes through the
//! [`QueryEngine`] capability trait, whose handle types own exactly one native
//! resource each and release it when dropped:
//!
//! - [`litecore::LiteCoreEngine`] loads a LiteCore-compatible shared library at
//!   runtime and resolves its entry points once.
//! - [`scripted::ScriptedEngine`] answers statements from a table of canned
//!   responses, for tests and dry runs.

pub mod binding;
pub mod litecore;
pub mod scripted;
pub mod symbols;

pub use binding::{CompileError, EngineError, QueryEngine, RowColumns};
pub use litecore::LiteCoreEngine;
pub use scripted::{HandleBalance, ScriptedEngine};
