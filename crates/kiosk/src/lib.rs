pub mod cli;
pub mod config;
pub mod runtime;

pub mod disc;
pub mod error;
pub mod events;
pub mod metadata;
pub mod orchestrator;
pub mod pipeline;
pub mod radio;
pub mod receiver;
pub mod recognition;
pub mod sampler;
pub mod sequencer;
pub mod tracklist;

mod command;
mod http_api;
mod status;

#[cfg(test)]
mod testing;
