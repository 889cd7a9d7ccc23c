//! Dice outcome generation

use crate::errors::ConfigurationError;
use crate::games::types::{BetType, DiceRoll, GameOutcome};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Source of raw dice values, each in 1..=6
pub trait DiceSource: Send + Sync {
    fn throw(&self) -> [u8; 3];
}

/// Uniform dice from the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngDice;

impl DiceSource for ThreadRngDice {
    fn throw(&self) -> [u8; 3] {
        let mut rng = rand::thread_rng();
        [rng.gen_range(1..=6), rng.gen_range(1..=6), rng.gen_range(1..=6)]
    }
}

/// Replays a fixed sequence of throws, cycling when exhausted
#[derive(Debug)]
pub struct FixedDice {
    throws: Vec<[u8; 3]>,
    next: AtomicUsize,
}

impl FixedDice {
    pub fn new(dice: [u8; 3]) -> Result<Self, ConfigurationError> {
        Self::sequence(vec![dice])
    }

    /// Rejects an empty sequence and faces outside 1..=6
    pub fn sequence(throws: Vec<[u8; 3]>) -> Result<Self, ConfigurationError> {
        if throws.is_empty() {
            return Err(ConfigurationError::MissingRequired("fixed dice throws".to_string()));
        }
        if let Some(bad) = throws.iter().find(|t| t.iter().any(|d| !(1..=6).contains(d))) {
            return Err(ConfigurationError::InvalidValue {
                field: "fixed dice".to_string(),
                value: format!("{:?}", bad),
                reason: "faces must be in 1..=6".to_string(),
            });
        }
        Ok(Self {
            throws,
            next: AtomicUsize::new(0),
        })
    }
}

impl DiceSource for FixedDice {
    fn throw(&self) -> [u8; 3] {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        self.throws[i % self.throws.len()]
    }
}

/// Stateless outcome generator; cheap to clone and safe to share
#[derive(Clone)]
pub struct GameEngine {
    source: Arc<dyn DiceSource>,
}

impl GameEngine {
    pub fn new(source: Arc<dyn DiceSource>) -> Self {
        Self { source }
    }

    /// Engine backed by the thread RNG
    pub fn random() -> Self {
        Self::new(Arc::new(ThreadRngDice))
    }

    /// Engine that always rolls `dice` (for testing)
    pub fn fixed(dice: [u8; 3]) -> Result<Self, ConfigurationError> {
        Ok(Self::new(Arc::new(FixedDice::new(dice)?)))
    }

    pub fn roll(&self) -> DiceRoll {
        DiceRoll::from_dice(self.source.throw())
    }

    /// Roll and judge a bet in one step
    pub fn play(&self, bet_type: BetType) -> (DiceRoll, GameOutcome) {
        let roll = self.roll();
        (roll, roll.outcome_for(bet_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::ResultCategory;

    #[test]
    fn test_random_rolls_stay_in_range() {
        let engine = GameEngine::random();
        for _ in 0..10_000 {
            let roll = engine.roll();
            assert!(roll.dice.iter().all(|d| (1..=6).contains(d)));
            assert!((3..=18).contains(&roll.total));
            assert_eq!(roll.total, roll.dice.iter().sum::<u8>());
            let small = (4..=10).contains(&roll.total);
            assert_eq!(roll.category == ResultCategory::Small, small);
        }
    }

    #[test]
    fn test_every_face_appears() {
        let engine = GameEngine::random();
        let mut seen = [false; 6];
        for _ in 0..2_000 {
            for d in engine.roll().dice {
                seen[(d - 1) as usize] = true;
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_triple_ones_is_big() {
        let engine = GameEngine::fixed([1, 1, 1]).unwrap();
        let (roll, outcome) = engine.play(BetType::Big);
        assert_eq!(roll.total, 3);
        assert_eq!(roll.category, BetType::Big);
        assert_eq!(outcome, GameOutcome::Win);
    }

    #[test]
    fn test_fixed_sequence_cycles() {
        let dice = FixedDice::sequence(vec![[1, 2, 3], [6, 6, 6]]).unwrap();
        assert_eq!(dice.throw(), [1, 2, 3]);
        assert_eq!(dice.throw(), [6, 6, 6]);
        assert_eq!(dice.throw(), [1, 2, 3]);
    }

    #[test]
    fn test_fixed_dice_rejects_bad_throws() {
        assert!(matches!(FixedDice::sequence(Vec::new()), Err(ConfigurationError::MissingRequired(_))));
        assert!(matches!(
            FixedDice::sequence(vec![[1, 2, 3], [0, 4, 7]]),
            Err(ConfigurationError::InvalidValue { .. })
        ));
        assert!(GameEngine::fixed([6, 6, 7]).is_err());
    }
}
