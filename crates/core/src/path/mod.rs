//! Data-path transforms applied around every pipeline step.
//!
//! Read paths (`InputPath`, `OutputPath`, parameter references) use the
//! grammar `$` followed by `.key` or `[index]` segments and always select a
//! single value. Write paths (`ResultPath`) are dot-only.

mod merge;
mod parameters;
mod read;

pub use merge::{merge_by_keys, merge_by_result_path};
pub use parameters::apply_parameters;
pub use read::{parse_read_path, query, PathStep};
