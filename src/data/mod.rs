//! Data layer: the raw record table, loading, and schema normalization.
//!
//! Architecture:
//! ```text
//!  .csv / .json / .parquet
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  parse file → RecordTable
//!   └──────────┘
//!        │
//!        ▼
//!   ┌─────────────┐
//!   │ RecordTable  │  named columns of CellValue
//!   └─────────────┘
//!        │
//!        ▼
//!   ┌───────────┐
//!   │ normalize  │  resolve each column to numeric or text
//!   └───────────┘
//! ```

pub mod loader;
pub mod model;
pub mod normalize;
