//! HTTP-edge middleware: request logging and the per-client rate limiter
//! (spec.md 5, 6). Out of the core C1-C10 component set but required to
//! run the service end to end.

pub mod logging;
pub mod rate_limit;
