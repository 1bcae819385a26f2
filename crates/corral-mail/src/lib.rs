//! Client side of the external agent-mail service: durable messaging plus
//! advisory file reservations.
//!
//! The service speaks JSON-RPC 2.0 over HTTP with a bearer token.
//! [`MailTransport`] is the seam between the wire protocol and the
//! reservation/broadcast logic built on top of it; [`rpc::HttpMailClient`]
//! is the production implementation, [`testing::RecordingMail`] the double.

pub mod read_log;
pub mod reservation;
pub mod rpc;
pub mod testing;

pub use reservation::{ReservationClient, ReservationError};
pub use rpc::{
    ConflictHolder, HttpMailClient, Importance, InboxMessage, MailError, MailTransport,
    ReleaseSpec, ReserveOutcome,
};
