pub mod login;
pub mod transfer;

pub use login::LoginGate;
pub use transfer::{CompletedFile, Fed, FileReceiveState, TransferSlot};
