//! Integration tests across crate boundaries

mod factory_tests;
mod service_tests;
