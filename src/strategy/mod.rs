pub mod sizer;

pub use sizer::{PositionSizer, Sizing};
