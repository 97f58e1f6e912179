#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

pub mod bus;
pub mod client;
pub mod endpoint;
pub mod frame;
pub mod message;
pub mod session;
pub mod transform;

pub use bus::Bus;
pub use endpoint::Endpoint;
pub use message::{RelayRequest, StatusUpdate};
pub use session::ClientSession;
pub use transform::{PrefixTransform, Transform};
