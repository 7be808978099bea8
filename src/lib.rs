pub mod aggregate;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod fingerprint;
pub mod games;
pub mod ml_blend;
pub mod normalize;
pub mod performance;
pub mod powerscore;
pub mod recency;
pub mod shrinkage;
pub mod sos;
pub mod window;
