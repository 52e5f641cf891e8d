//! Terminal output for the `genostore` binary

pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, error, header, human_bytes, info, record, section, success, summary_row, timing, warn};
pub use progress::{ProgressManager, Spinner};
pub use table::{ContainerRow, EncodingRow, TableBuilder, render};
pub use theme::{theme, Theme};
