//! Domain events: from the external change feed and the node's push
//! endpoint, over the entity bus, into WebSocket channels.

pub mod bus;
pub mod channels;
pub mod feed;
pub mod push;

pub use bus::{BusEvent, BusListener, ERROR_KIND, EntityBridge, EntityBus};
pub use channels::{ChannelCategory, ChannelDescriptors, ChannelHub, ChannelParam, ChannelSpec};
pub use feed::{ChangeEvent, ChangeFeed, ChangeFilter, FeedError, MemoryChangeFeed, MemoryFeedHandle};
pub use push::{PushBridge, PushFeed, PushMessage, TcpPushFeed};
