//! End-to-end tests: real agent, real processes, real storage

mod guest_session_tests;
mod process_pipeline_tests;
