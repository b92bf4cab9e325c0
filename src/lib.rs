#![forbid(unsafe_code)]

pub mod backend;
pub mod boxes;
pub mod build;
pub mod citation;
pub mod classify;
pub mod cli;
pub mod compile;
pub mod config;
pub mod formats;
pub mod logging;
pub mod matter;
pub mod openai;
pub mod outline;
pub mod pacing;
pub mod prompts;
pub mod render;
pub mod report;
pub mod research;
pub mod store;
pub mod synth;

#[cfg(test)]
mod testing;
