#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bridge;
pub mod config;
pub mod mqtt;
pub mod protocol;
pub mod radio;
pub mod serial;
pub mod uplink;
