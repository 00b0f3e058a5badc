use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::schemas::exam::{Question, SecurityPolicy};

/// The attempt-specific ordering, plus the seed that reproduces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Materialized {
    pub(crate) questions: Vec<Question>,
    pub(crate) seed: u64,
}

/// Builds the per-attempt question order and option order.
///
/// Question order is shuffled when `randomize_questions` is set, and every question's
/// options are shuffled independently when `randomize_options` is set. Options are
/// moved as whole strings, so `correct_answer` keeps pointing at the same text. When no
/// seed is supplied a fresh one is drawn and returned for later replay.
pub(crate) fn materialize(
    questions: &[Question],
    policy: &SecurityPolicy,
    seed: Option<u64>,
) -> Materialized {
    let seed = seed.unwrap_or_else(rand::random::<u64>);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ordered = questions.to_vec();

    if policy.randomize_questions {
        ordered.shuffle(&mut rng);
    }
    if policy.randomize_options {
        for question in &mut ordered {
            question.options.shuffle(&mut rng);
        }
    }

    Materialized { questions: ordered, seed }
}
