mod conn;
mod mux;
mod pipeline;
mod stream;
mod subscribe;

pub use conn::Conn;
pub use mux::Multiplexer;
pub use pipeline::Pipeline;
pub use stream::Stream;
pub use subscribe::{Message, Subscriber};
