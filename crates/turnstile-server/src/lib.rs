#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{
    config::{CliArgs, Mode, ReadinessKind, SelectionPolicy, ServerConfig},
    referral::ReferralBroker,
    relay::RelayBroker,
};
