// Tiller Core Library
// Event-to-state input pipeline with multi-buffered device state

pub mod device;
pub mod diagnostics;
pub mod engine;
pub mod event;
pub mod fourcc;
pub mod state;
pub mod update;

pub use device::registry::{DeviceRegistry, RegistryError, RegistryResult};
pub use device::template::{
    ControlKind, ControlSpec, DeviceTemplate, TemplateError, TemplateRegistry, TemplateResult,
};
pub use device::{Control, Device, IoctlHandler, INVALID_DEVICE_ID, IOCTL_UNHANDLED};
pub use diagnostics::{Diagnostic, DiagnosticsObserver};
pub use engine::{EngineError, EngineResult, InputEngine};
pub use event::queue::{EventBatch, EventQueue, EventSink};
pub use event::record::{
    EventError, EventRecord, EventResult, StateView, DEVICE_REMOVAL_EVENT, EVENT_HEADER_SIZE,
    STATE_EVENT, STATE_PAYLOAD_HEADER_SIZE,
};
pub use fourcc::FourCC;
pub use state::block::{StateBlock, STATE_ALIGNMENT};
pub use state::buffers::{StateBuffers, StateError, StateResult};
pub use update::{UpdateMask, UpdateType};
