//! Push provider clients for the reminders service.
//!
//! [`PushClient`] is the seam the dispatcher sends through. [`FcmClient`]
//! talks to the FCM HTTP v1 API with service-account credentials;
//! [`NoopPushClient`] stands in when credentials are absent so the rest of
//! the pipeline keeps operating.

pub mod client;
pub mod error;
pub mod fcm;
pub mod message;

pub use client::{NoopPushClient, PushClient};
pub use error::PushError;
pub use fcm::{FcmClient, FcmConfig};
pub use message::PushMessage;
