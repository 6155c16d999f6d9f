//! Model rotation scheduling for the prompt-writer, SQL-writer, and judge
//! roles.
//!
//! Each role is configured with a (possibly empty) list of candidate models
//! and a rotation policy. A non-empty list produces a `schedule` of length
//! equal to `max_retries`, one entry per iteration; an empty list means the
//! role always uses its single fixed model and the scheduler is never
//! consulted (see [`build_schedule`]).

use rand::Rng;

/// A model rotation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// `schedule[i] = models[i mod N]`.
    Orderly,
    /// Uniform random choice each slot, never repeating the immediately
    /// previous slot's model (when more than one candidate exists).
    Random,
    /// Deterministic pseudo-irregular cycling driven by a fixed prime sieve
    /// and modulus, reproducible across runs for a given model list.
    Cicada,
}

impl SchedulePolicy {
    /// Parses a policy name; unrecognized names fall back to `Orderly`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "random" => SchedulePolicy::Random,
            "cicada" => SchedulePolicy::Cicada,
            _ => SchedulePolicy::Orderly,
        }
    }
}

/// Primes at or below 100, used by the `cicada` policy. Fixed set — not a
/// parameter, so the policy is reproducible across runs.
const CICADA_PRIMES: &[u64] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

const CICADA_MODULUS: u64 = 233;

/// Builds a length-`count` model schedule for `models` under `policy`.
///
/// Returns an empty vector when `models` is empty or `count` is zero: an
/// empty schedule signals the caller to use its single fixed model instead
/// of ever consulting the scheduler (see the empty-models resolution this
/// mirrors).
#[must_use]
pub fn build_schedule(models: &[String], policy: SchedulePolicy, count: usize) -> Vec<String> {
    if models.is_empty() || count == 0 {
        return Vec::new();
    }
    if models.len() == 1 {
        return vec![models[0].clone(); count];
    }

    match policy {
        SchedulePolicy::Orderly => (0..count).map(|i| models[i % models.len()].clone()).collect(),
        SchedulePolicy::Random => build_random_schedule(models, count),
        SchedulePolicy::Cicada => build_cicada_schedule(models, count),
    }
}

fn build_random_schedule(models: &[String], count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let mut schedule = Vec::with_capacity(count);
    let mut previous: Option<usize> = None;
    for _ in 0..count {
        let mut idx = rng.gen_range(0..models.len());
        if Some(idx) == previous {
            idx = (idx + 1) % models.len();
        }
        schedule.push(models[idx].clone());
        previous = Some(idx);
    }
    schedule
}

fn build_cicada_schedule(models: &[String], count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let prime = CICADA_PRIMES[i % CICADA_PRIMES.len()];
            let pos = (i as u64 * prime) % CICADA_MODULUS;
            models[(pos as usize) % models.len()].clone()
        })
        .collect()
}

/// Resolves the model used for retry `attempt` (0-based) of iteration
/// `iteration` (1-based), given a possibly-empty `schedule` and the role's
/// single fixed model.
///
/// When `schedule` is non-empty, `model = schedule[(iteration - 1 +
/// attempt) % schedule.len()]`; retries within an iteration advance through
/// the same schedule an offset of one position per attempt, so a malformed
/// or empty response never retries against the identical model twice in a
/// row as long as the schedule has more than one entry.
#[must_use]
pub fn model_for_attempt<'a>(
    schedule: &'a [String],
    iteration: usize,
    attempt: usize,
    fixed_model: &'a str,
) -> &'a str {
    if schedule.is_empty() {
        return fixed_model;
    }
    let idx = (iteration.saturating_sub(1) + attempt) % schedule.len();
    &schedule[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("model-{i}")).collect()
    }

    #[test]
    fn empty_models_yields_empty_schedule() {
        assert!(build_schedule(&[], SchedulePolicy::Orderly, 10).is_empty());
    }

    #[test]
    fn zero_count_yields_empty_schedule() {
        assert!(build_schedule(&models(3), SchedulePolicy::Orderly, 0).is_empty());
    }

    #[test]
    fn orderly_cycles_modulo_length() {
        let schedule = build_schedule(&models(3), SchedulePolicy::Orderly, 7);
        assert_eq!(
            schedule,
            vec!["model-0", "model-1", "model-2", "model-0", "model-1", "model-2", "model-0"]
        );
    }

    #[test]
    fn cicada_is_deterministic() {
        let a = build_schedule(&models(4), SchedulePolicy::Cicada, 20);
        let b = build_schedule(&models(4), SchedulePolicy::Cicada, 20);
        assert_eq!(a, b);
    }

    #[test]
    fn cicada_matches_prime_mod_formula() {
        let models = models(5);
        let schedule = build_schedule(&models, SchedulePolicy::Cicada, 5);
        for (i, entry) in schedule.iter().enumerate() {
            let prime = CICADA_PRIMES[i % CICADA_PRIMES.len()];
            let pos = (i as u64 * prime) % CICADA_MODULUS;
            assert_eq!(*entry, models[(pos as usize) % models.len()]);
        }
    }

    #[test]
    fn model_for_attempt_uses_fixed_model_when_schedule_empty() {
        assert_eq!(model_for_attempt(&[], 4, 2, "fixed"), "fixed");
    }

    #[test]
    fn model_for_attempt_advances_with_retry_offset() {
        let schedule = models(3);
        assert_eq!(model_for_attempt(&schedule, 1, 0, "fixed"), "model-0");
        assert_eq!(model_for_attempt(&schedule, 1, 1, "fixed"), "model-1");
        assert_eq!(model_for_attempt(&schedule, 2, 0, "fixed"), "model-1");
    }
}
