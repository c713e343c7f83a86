//! Command mutation engine
//!
//! Applies exactly one randomly chosen structural transformation to a raw
//! corpus command. Mutation works on bytes: the result may be arbitrary
//! binary data and is only split into protocol arguments when sent.

pub mod buffer;
pub mod strategies;

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use rand::Rng;
use serde::Serialize;

use crate::corpus::RawCommand;

pub use buffer::CommandBuffer;

/// A mutation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Insert a special character
    InsertChar,
    /// Duplicate a span of bytes
    DuplicateSpan,
    /// Delete one or two bytes
    DeleteSpan,
    /// Flip the case of one byte in the verb
    ToggleCase,
    /// Insert a whitespace byte
    InjectWhitespace,
    /// Shuffle, swap or move arguments
    ReorderArgs,
    /// Replace an argument with a differently typed value
    SubstituteArg,
}

impl Strategy {
    /// Every strategy, in selection order
    pub const ALL: [Strategy; 7] = [
        Strategy::InsertChar,
        Strategy::DuplicateSpan,
        Strategy::DeleteSpan,
        Strategy::ToggleCase,
        Strategy::InjectWhitespace,
        Strategy::ReorderArgs,
        Strategy::SubstituteArg,
    ];

    /// Pick a strategy uniformly at random
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::InsertChar => "insert_char",
            Strategy::DuplicateSpan => "duplicate_span",
            Strategy::DeleteSpan => "delete_span",
            Strategy::ToggleCase => "toggle_case",
            Strategy::InjectWhitespace => "inject_whitespace",
            Strategy::ReorderArgs => "reorder_args",
            Strategy::SubstituteArg => "substitute_arg",
        }
    }

    /// Apply this strategy to `input`
    pub fn apply<R: Rng + ?Sized>(&self, input: &[u8], rng: &mut R) -> Vec<u8> {
        match self {
            Strategy::InsertChar => strategies::insert_char(input, rng),
            Strategy::DuplicateSpan => strategies::duplicate_span(input, rng),
            Strategy::DeleteSpan => strategies::delete_span(input, rng),
            Strategy::ToggleCase => strategies::toggle_case(input, rng),
            Strategy::InjectWhitespace => strategies::inject_whitespace(input, rng),
            Strategy::ReorderArgs => strategies::reorder_args(input, rng),
            Strategy::SubstituteArg => strategies::substitute_arg(input, rng),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A command ready to be sent: the raw command after at most one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutatedCommand {
    bytes: Vec<u8>,
    strategy: Option<Strategy>,
}

impl MutatedCommand {
    /// Wrap a command without mutating it
    pub fn identity(raw: &RawCommand) -> Self {
        Self {
            bytes: raw.as_bytes().to_vec(),
            strategy: None,
        }
    }

    /// Build from already-mutated bytes
    pub fn new(bytes: impl Into<Vec<u8>>, strategy: Option<Strategy>) -> Self {
        Self {
            bytes: bytes.into(),
            strategy,
        }
    }

    /// Command bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The applied strategy, if any
    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    /// Strategy name for logging, `"none"` for unmutated commands
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.map_or("none", |s| s.name())
    }

    /// Protocol arguments: the command split on ASCII whitespace.
    pub fn args(&self) -> Vec<Bytes> {
        buffer::tokenize(&self.bytes)
            .into_iter()
            .map(Bytes::from)
            .collect()
    }

    /// Lossy text form for logs
    pub fn display(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Mutate `raw` with one random strategy, or pass it through unchanged when
/// fuzzing is disabled or the command is empty.
pub fn mutate<R: Rng + ?Sized>(raw: &RawCommand, enabled: bool, rng: &mut R) -> MutatedCommand {
    if !enabled || raw.is_empty() {
        return MutatedCommand::identity(raw);
    }
    let strategy = Strategy::random(rng);
    MutatedCommand::new(strategy.apply(raw.as_bytes(), rng), Some(strategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::Strategy;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_disabled_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let raw = RawCommand::new("SET key value");
        for _ in 0..20 {
            let cmd = mutate(&raw, false, &mut rng);
            assert_eq!(cmd.as_bytes(), b"SET key value");
            assert_eq!(cmd.strategy(), None);
            assert_eq!(cmd.strategy_name(), "none");
        }
    }

    #[test]
    fn test_empty_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let cmd = mutate(&RawCommand::new("   "), true, &mut rng);
        assert!(cmd.as_bytes().is_empty());
        assert!(cmd.args().is_empty());
    }

    #[test]
    fn test_every_strategy_is_reachable() {
        let mut rng = StdRng::seed_from_u64(42);
        let raw = RawCommand::new("HSET user:1 name alice age 30");
        let seen: HashSet<Strategy> = (0..500)
            .filter_map(|_| mutate(&raw, true, &mut rng).strategy())
            .collect();
        assert_eq!(seen.len(), Strategy::ALL.len());
    }

    #[test]
    fn test_args_split_on_whitespace() {
        let cmd = MutatedCommand::new(b"SET\tk \r\nv\xff".to_vec(), Some(Strategy::InjectWhitespace));
        assert_eq!(
            cmd.args(),
            vec![
                Bytes::from_static(b"SET"),
                Bytes::from_static(b"k"),
                Bytes::from_static(b"v\xff")
            ]
        );
        assert_eq!(cmd.strategy_name(), "inject_whitespace");
        assert_eq!(cmd.display(), "SET\tk \r\nv\u{fffd}");
    }

    proptest! {
        #[test]
        fn prop_mutate_never_panics(line in "\\PC{0,40}", seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let raw = RawCommand::new(&line);
            let cmd = mutate(&raw, true, &mut rng);
            if raw.is_empty() {
                prop_assert!(cmd.strategy().is_none());
            } else {
                prop_assert!(cmd.strategy().is_some());
            }
        }

        #[test]
        fn prop_disabled_is_identity(line in "\\PC{0,40}", seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let raw = RawCommand::new(&line);
            let cmd = mutate(&raw, false, &mut rng);
            prop_assert_eq!(cmd.as_bytes(), raw.as_bytes());
            prop_assert!(cmd.strategy().is_none());
        }
    }
}
