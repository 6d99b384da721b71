//! Redis-backed cache tier implementation.

pub mod cache;

pub use cache::RedisCache;
