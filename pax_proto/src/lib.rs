// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Transport-independent protocol definitions for PAX fabric-switch
//! management: MRPC command identifiers, register-space layout, wire structs
//! for the firmware download and chunked dump protocols, the event register
//! model, and the framing used by the network and serial management channels.
//!
//! This crate contains no I/O. Everything here is shared between the
//! transports in `pax_transport` and the management library in `pax_mgmt`.

#![forbid(unsafe_code)]

pub mod crc8;
pub mod dump;
pub mod error;
pub mod event;
pub mod fw;
pub mod gas;
pub mod mrpc;
pub mod net;
pub mod regs;
