//! pipewright - connector generation from plain-language source descriptions.
//!
//! A generation run probes a source for sample records, derives an
//! extraction schema and a storage schema from them, renders a connector
//! module, writes it to a per-target workspace and optionally deploys it.
//! See [`pipeline::Orchestrator`].

pub mod cli;
pub mod config;
pub mod deploy;
pub mod extraction;
pub mod llm;
pub mod models;
pub mod openapi;
pub mod pipeline;
pub mod synthesis;
pub mod template;
pub mod workspace;
