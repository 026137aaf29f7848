pub mod connection;
mod receiver;

pub use connection::{Connection, ConnectionInfo, ConnectionOptions, ConnectionSender};
