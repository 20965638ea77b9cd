//! Per-request services shared by the public runtime surface: slug
//! resolution, row-level security, and auditing.

mod audit;
mod resolver;
mod rls;

pub use audit::{AuditSink, TracingAuditSink};
pub use resolver::RuntimeResolver;
pub use rls::{RlsEngine, RlsScope};
