//! Shield state and its single writer.

mod controller;

pub use controller::{ShieldController, ShieldState};
