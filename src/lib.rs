pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod protocol;

#[cfg(test)]
mod test_support;

pub use cli::prompt;
pub use client::{Client, ClientError, SessionState, Subscription};
pub use command::{Command, CommandError};
pub use config::ClientOptions;
pub use protocol::{ChangeEvent, Document, Encoding, Query};
