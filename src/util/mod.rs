pub mod environment;
pub mod subscribe;

pub use environment::{is_browser, is_node};
pub use subscribe::{PartialObserver, Unsubscribe};
