//! Review-service client.
//!
//! The client owns one [`Transport`](crate::transport::Transport) and one
//! [`PipelineRegistry`](crate::resilience::PipelineRegistry); every request
//! goes through the pipeline of its endpoint (or the global one).

pub mod builder;
pub mod core;
pub mod signals;

pub use builder::ReviewClientBuilder;
pub use core::ReviewClient;
pub use signals::SignalsSnapshot;
