//! Vision Service models.
//!
//! Contains the domain records and the HTTP request/response types.

pub mod api;
pub mod ledger;
pub mod meeting;

pub use api::*;
pub use ledger::{CreditOutcome, TokenAction, TokenUsageRecord, UserAccount};
pub use meeting::{EndMode, MeetingRecord, MeetingStateError, MeetingStatus, NewMeeting};
