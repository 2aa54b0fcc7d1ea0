mod dispatch;
mod invocation;
mod kind;
mod lifecycle;

pub use dispatch::{DispatchReport, RejectedTask, TaskDispatcher};
pub use invocation::{TaskCompletion, TaskInvocation};
pub use kind::{TaskKind, TaskRequest};
pub use lifecycle::{TaskBoard, TaskPhase};
