//! Scoped sessions.
//!
//! Each scope (an HTTP request, a tokio task, a thread, or a caller-named scope) owns at most one
//! [`Session`] at a time. The registry hands out the same session for the same scope
//! until it is removed.

pub mod scope;
pub mod unit;

pub use scope::{ScopeFn, ScopeId, ScopedSession, current_scope, with_scope};
pub use unit::{RecordedQuery, Session};
