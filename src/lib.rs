//! Two-door access control node - decision and actuation core.
//!
//! The modules here are hardware independent: time enters as monotonic
//! milliseconds and credentials enter as decoded frames, so the whole
//! decision pipeline runs (and is tested) on the host. The `esp32` feature
//! adds the firmware-facing modules (network client, HTTP API, SNTP).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod access;
pub mod clock;
pub mod credential;
pub mod door;
pub mod events;
pub mod pin;
pub mod proto;
pub mod schedule;
pub mod state;
pub mod storage;
pub mod tempcode;
pub mod wiegand;

#[cfg(feature = "esp32")]
pub mod controller;
#[cfg(feature = "esp32")]
pub mod httpd;
#[cfg(feature = "esp32")]
pub mod sntp;
