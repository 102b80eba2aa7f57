//! Top-level facade crate for httpprom.
//!
//! Re-exports the core registry and the exporter so users can depend on a single crate.

pub mod core {
    pub use httpprom_core::*;
}

pub mod exporter {
    pub use httpprom_exporter::*;
}
