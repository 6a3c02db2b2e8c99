//! The narrow collaborator stores consulted by the request executor.
//!
//! Each store is a small, self-contained manager mirroring one concern of a
//! browser: cookies, the HTTP cache, authorization credentials, static DNS
//! overrides, and configured request headers. The executor consults and
//! updates them; none of them issue requests themselves.
//!
//! Thread-safety follows the sharing rules of the engine: the
//! [`cache::CacheStore`] is always shared between the parent sample and its
//! concurrent resource fetches and is internally locked; the
//! [`cookie::CookieStore`] is cloned per concurrent fetch and merged back
//! after the join, so concurrent writers never race.

pub mod auth;
pub mod cache;
pub mod cookie;
pub mod dns;
pub mod headers;
