//! # rowelect-observability
//!
//! Tracing subscriber setup for processes running rowelect elections.

pub mod logging;

pub use logging::{
    init_logging, init_logging_with_config, init_test_logging, try_init_logging_with_config,
    LoggingConfig,
};
