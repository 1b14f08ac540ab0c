//! Mailcast: rule-based audience targeting and bulk email campaign dispatch.
//!
//! Contacts are selected by declarative rule groups ([`audience`]), campaigns
//! move through a guarded lifecycle and are delivered through an ordered
//! list of mail relays with failover ([`campaign`], [`transport`]). Every
//! delivery attempt lands in an append-only audit log.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod db;
pub mod logging;

pub mod audience;
pub mod campaign;
pub mod transport;
