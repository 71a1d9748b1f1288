pub mod elector;
pub mod endpoint;
pub mod finder;
pub mod registry;
pub mod store;

pub use elector::Elector;
pub use endpoint::Endpoint;
pub use finder::{Finder, Snapshot};
pub use registry::{announce, AnnounceConfig, Announcer};
pub use store::{
    Entry, EtcdOptions, EtcdStore, EtcdTlsOptions, MemoryStore, Node, Store, StoreError,
    WatchEvent,
};
