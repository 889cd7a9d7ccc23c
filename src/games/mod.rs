pub mod dice_engine;
pub mod types;

pub use dice_engine::{DiceSource, FixedDice, GameEngine, ThreadRngDice};
pub use types::*;
