pub mod live;
pub mod watch;

pub use live::LiveStore;
pub use watch::{FeedItem, MessageWatch, ParticipantWatch};
