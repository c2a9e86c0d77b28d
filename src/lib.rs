//! Re-exports of the reasoning engine crates, so downstream code can depend
//! on `noetic` alone instead of the individual workspace members.

pub use noetic_config as config;
pub use noetic_engine as engine;
pub use noetic_otel as otel;
