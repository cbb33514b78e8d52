pub mod governor;

pub use governor::{Governed, RiskGovernor, RiskSnapshot};
