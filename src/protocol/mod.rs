pub mod codec;
pub mod frame;
pub mod reader;
pub mod stream_id;

pub use frame::Reply;
pub use reader::FrameReader;
pub use stream_id::{EntryId, StreamEntry, StreamId};
