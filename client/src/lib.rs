//! Producer-side client: builds a validated [`TaskMessage`] from input and
//! [`SendOptions`], submits it directly or via the outbox, and returns an [`AsyncResult`] to
//! poll for the eventual result.
mod async_result;
mod client;
mod error;
mod options;

pub use self::async_result::AsyncResult;
pub use self::client::Client;
pub use self::error::InvalidSendOptions;
pub use self::error::TaskFailed;
pub use self::options::SendOptions;

pub use dotcelery_model::TaskMessage;
