//! Shared domain model for huddle: workspaces, channels, direct
//! conversations, threaded messages, invites, and the unread/notification
//! diffing rules that clients and the gateway both run.

pub mod api;
pub mod events;
pub mod models;
pub mod unread;
