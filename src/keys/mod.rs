//! Key lifecycle: generation, storage with commit gating, rotation.

pub mod generation;
pub mod item;
pub mod rotation;
pub mod store;

pub use item::KeyItem;
pub use rotation::KeyRotationPolicy;
pub use store::{KeyStore, LatestItemStore, ReceiptOutcome};
