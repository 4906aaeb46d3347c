//! Carebook: chat-driven therapy booking with coordinator approval.
//!
//! Clients talk to a conversation responder over WhatsApp; bookings land in
//! a SQLite ledger as `pending` and the coordinator approves, declines or
//! asks for changes by replying in plain text. Every state change notifies
//! the client through templated messages.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod phone;
pub mod store;
pub mod types;

pub mod booking;
pub mod coordinator;
pub mod notify;
pub mod responder;

pub mod whatsapp;
