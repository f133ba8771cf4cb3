// Order execution, position bookkeeping and the daily decision loop
pub mod daily_loop;
pub mod executor;
pub mod portfolio;
pub mod position_manager;
pub mod scheduler;

pub use daily_loop::{CycleReport, DailyLoop, Score};
pub use executor::{Applied, Executor};
pub use portfolio::{current_prices, liquidate_all, Holding, PortfolioView};
pub use position_manager::PositionManager;
pub use scheduler::{next_run, run_scheduled};
