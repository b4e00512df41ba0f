//! Outbound email domain module.
//!
//! Email send jobs (one job = one outbound message), the mail channel account
//! a tenant sends through, and the message payload. Pure domain logic only.

pub mod account;
pub mod job;
pub mod message;

pub use account::MailChannelAccount;
pub use job::{EmailJobStatus, EmailSendJob};
pub use message::OutboundMessage;
