//! Clinic intake: a conversational assistant that turns free-text messages
//! into patient drafts, navigation, searches and summary queries.
//!
//! A text-generation service interprets each message into one [`intent::Action`];
//! the [`engine::IntakeEngine`] accumulates a draft across turns in a
//! [`session::SessionStore`] and decides when enough data has been collected.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod db;
pub mod logging;

pub mod draft;
pub mod normalize;
pub mod schema;

pub mod intent;
pub mod prompt;
pub mod providers;

pub mod resolver;
pub mod routes;
pub mod session;

pub mod query;
pub mod store;

pub mod engine;
pub mod response;

pub mod http;
