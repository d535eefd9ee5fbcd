pub mod connection;
pub mod dispatcher;

pub use connection::{FrameHandler, handle_connection};
pub use dispatcher::Dispatcher;
