//! Container specifications, states and the lifecycle state machine.

mod lifecycle;
mod spec;
mod state;

pub use lifecycle::{ContainerLifecycle, UpOptions, WaitPolicy};
pub use spec::{
    BindMount, CreateArgs, ImageSource, NetworkAttachment, PortMapping, PostStartHook, Promotion,
    ReadinessProbe, ServiceSpec,
};
pub use state::ContainerState;
