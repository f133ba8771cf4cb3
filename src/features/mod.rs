// Feature construction shared by dataset export, backtesting and live inference

pub mod builder;
pub mod schema;

pub use builder::{diff, normalize_frame, pct_change, FeatureBuilder, FeatureRow};
pub use schema::{ensure_canonical, FEATURE_COLUMNS, FEATURE_COUNT, SCHEMA_VERSION};
