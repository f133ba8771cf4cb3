// Exit discipline and buy selection, shared by the live loop and the backtester
pub mod selection;
pub mod state_machine;

pub use selection::{allocate_equal, select_candidates, Allocation, Candidate};
pub use state_machine::{evaluate, Evaluation, RiskAction, RiskParams};
