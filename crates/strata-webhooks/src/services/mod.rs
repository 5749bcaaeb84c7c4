//! Delivery pipeline services.

pub mod dispatcher;
pub mod events;
pub mod registry;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use events::EventService;
pub use registry::RegistryService;
pub use transport::Transport;
