//! HTTP-facing glue shared by the middleware layers.

pub mod response;
