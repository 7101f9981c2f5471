// src/callosum/mod.rs

pub mod bridge;
pub mod circuit_breaker;
pub mod config;
pub mod consumer;
pub mod event_store;
pub mod id_generator;
pub mod message;
pub mod mtf_ranker;
pub mod orchestrator;
pub mod particle;
pub mod pattern_learner;
pub mod planner;
pub mod stream;
pub mod synthesis;
pub mod synthesizer;
pub mod task;

// Let's explicitly export the bridge so callers can reach it as
// callosum::CorpusCallosum instead of callosum::bridge::CorpusCallosum.
pub use bridge::CorpusCallosum;
