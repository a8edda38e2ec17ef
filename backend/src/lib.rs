pub mod config;
pub mod detection;
pub mod error;
pub mod inference;
pub mod media;
pub mod orchestrator;
pub mod routes;

#[cfg(test)]
mod testing;
