pub mod connector;
pub mod datagram;
pub mod frame;
pub mod subscribe;

pub use connector::{ConnectError, Connector};
pub use frame::{framed, FramedStream};
pub use subscribe::SubscribeRequest;
