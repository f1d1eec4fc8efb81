//! Online inference endpoint for a pretrained GPT-J causal language model.
//!
//! A [`worker::ModelWorker`] is built once per process and handed to the
//! axum router from [`api::server::create_router`]; each `POST /` is parsed
//! into a prompt batch, generated in one pass and returned as rows.

pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod hub;
pub mod layers;
pub mod llm;
pub mod weights;
pub mod worker;

#[cfg(test)]
mod fixtures;

pub use error::{Result, ServeError};
