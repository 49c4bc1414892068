//! Fluent builders that produce method bodies on a [`crate::cilassembly::MetadataBuilder`].

mod method_body;

pub use method_body::MethodBodyBuilder;
