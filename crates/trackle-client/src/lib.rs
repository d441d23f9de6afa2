pub mod api;
pub mod error;
pub mod transport;

pub use api::{BatchReply, Rejection, TrackItem, TrackingClient, PAGE_SIZE};
pub use error::ClientError;
