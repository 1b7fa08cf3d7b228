//! Bootstrap request dispatch.
//!
//! The broker loop decodes each message and hands the request to the
//! [`Dispatcher`], which applies it to the registry and answers with an
//! [`Action`]: a reply to send, a look-up to park, or rights to discard.
//!
//! ## Routing
//!
//! | id  | request        | answer                                        |
//! |-----|----------------|-----------------------------------------------|
//! | 402 | check-in       | port reply moving the receive right, or status |
//! | 403 | register       | status                                        |
//! | 404 | look-up        | port reply copying the send right, or status  |
//! | 406 | parent         | status 17                                     |
//! | 409 | subset         | status 17                                     |
//! | 700 | register-port  | as 403                                        |
//! | 701 | lookup-port    | as 404                                        |
//! | 702 | spawn-app      | status 46                                     |
//!
//! Anything else, including the broker's own wake message, is dropped.

mod pending;
mod router;

pub use self::pending::{ParkedLookup, PendingLookups};
pub use self::router::{Action, Dispatcher};
