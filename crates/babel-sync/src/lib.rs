//! Chat synchronization and translation orchestration.
//!
//! A [`session::ChatSession`] owns one client's view of a group: it writes
//! through a [`store::RemoteStore`], merges the store's change feed into its
//! local log with [`log::merge`], and hands new messages to the
//! [`dispatcher::TranslationDispatcher`] for fan-out.

pub mod dispatcher;
pub mod error;
pub mod log;
pub mod oracle;
pub mod presence;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
