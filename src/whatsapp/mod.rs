pub mod driver;
pub mod event_processor;
pub mod message_handler;
pub mod supervisor;

pub use driver::{ClientDriverAdapter, DriverEventSink, DriverHandle, ReconnectSchedule, SessionEventSink};
pub use event_processor::EventProcessor;
pub use message_handler::{MessageHandler, RawMessage};
pub use supervisor::SessionSupervisor;
