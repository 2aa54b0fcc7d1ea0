mod engine;
mod policy;
mod progress;

pub use engine::{day_reset, decide, goal_reached, Decision, GateBranch, GateInput};
pub use policy::{next_reblock_at, GatePolicy};
pub use progress::GateProgress;
