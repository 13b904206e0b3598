//! Test fixtures

mod two_node;

pub use two_node::{TwoNodeFixture, endpoint_of, node_config, pattern};
