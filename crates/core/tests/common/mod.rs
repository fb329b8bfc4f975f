/// Test context and trace builders.
pub mod harness;
