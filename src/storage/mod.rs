//! Local durable storage: the encrypted snapshot journal.

pub mod encrypted;
mod journal;

pub use journal::{EntryId, Journal, JournalEntry, JournalError};
