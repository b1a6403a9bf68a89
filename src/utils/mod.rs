pub mod convergence;
pub mod timing;

pub use convergence::{BreakdownInfo, Convergence, Outcome, SolveStats};
pub use timing::PhaseTimes;
