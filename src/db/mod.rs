mod models;
mod schema;

pub use models::{
    ArchiveStats, Joker, NewJoker, NewRound, NewRun, NewScreenshot, NewStrategy, Round, Run,
    RunListItem, RunPatch, RunStatus, Screenshot, SeedStats, Strategy, StrategyRef, StrategyStats,
    Tag,
};
pub use schema::Database;
