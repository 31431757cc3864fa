pub mod engine_state;
pub mod market_data;
pub mod signal;
pub mod smc;

pub use engine_state::*;
pub use market_data::*;
pub use signal::*;
pub use smc::*;
