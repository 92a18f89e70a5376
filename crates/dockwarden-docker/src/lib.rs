//! Container engine adapter: the `ContainerEngine` trait and its `bollard`
//! implementation.

pub mod bollard_adapter;
pub mod traits;

pub use bollard_adapter::BollardEngine;
pub use traits::{
    ContainerEngine, ContainerRef, EngineError, ExecOutput, RecreateSpec, RegistryAuth, Result,
};
