pub mod analyzers;
pub mod cache;
pub mod clock;
pub mod criteria;
pub mod fingerprint;
pub mod governor;
pub mod pipeline;
pub mod providers;
pub mod ranker;
pub mod scoring;
