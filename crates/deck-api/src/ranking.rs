//! Surfacing probabilities for feed hand selection.

use rand::Rng;
use uuid::Uuid;

use deck_types::models::PopularRankEntry;

/// Most cards injected into a feed per refresh.
pub const HAND_SIZE: usize = 10;

/// z² for a 95% confidence interval.
const Z_SQUARED: f64 = 3.8414588206;
const P_INIT: f64 = 0.5;
const CONTROVERSIAL_EXPONENT: f64 = 2.0;
const STEEPNESS_EXPONENT: f64 = 2.0;
const GOOD_THRESHOLD: f64 = 5.0;
const BAD_THRESHOLD: f64 = 15.0;

const UPVOTE_MASS: f64 = 1.0;
const COMMENT_MASS: f64 = 1.5;
const DOWNVOTE_MASS: f64 = 5.0;
const VIEW_MASS: f64 = 0.05;

/// Weighted count of every interaction with the card.
pub fn engagement_mass(e: &PopularRankEntry) -> f64 {
    let boost = e.score_mod.max(0.0);
    let penalty = (-e.score_mod).max(0.0);
    let idle_views = (e.views - e.upvotes - e.downvotes).max(0) as f64;
    e.upvotes as f64 * UPVOTE_MASS
        + e.comments as f64 * COMMENT_MASS
        + (e.downvotes as f64 + penalty) * DOWNVOTE_MASS
        + idle_views * VIEW_MASS
        + boost * UPVOTE_MASS
}

/// Share of the mass that is positive. 0.5 when nothing happened yet.
pub fn positive_ratio(e: &PopularRankEntry) -> f64 {
    let n = engagement_mass(e);
    if n == 0.0 {
        return 0.5;
    }
    let pos = (e.upvotes as f64 + e.score_mod.max(0.0)) * UPVOTE_MASS + e.comments as f64 * COMMENT_MASS;
    pos / n
}

fn confidence(n: f64) -> f64 {
    n / (n + Z_SQUARED)
}

fn p_controversial(n: f64) -> f64 {
    P_INIT + confidence(n).powf(CONTROVERSIAL_EXPONENT) * (1.0 - P_INIT)
}

fn bad_limit(n: f64) -> f64 {
    (1.0 - confidence(BAD_THRESHOLD)) * (1.0 - (BAD_THRESHOLD / n).sqrt())
}

fn good_limit(n: f64) -> f64 {
    1.0 - (1.0 - confidence(GOOD_THRESHOLD)) * (1.0 - (GOOD_THRESHOLD / n).sqrt())
}

/// Probability that the card is drawn into a hand, in `[0, 1]`.
pub fn p_surface(e: &PopularRankEntry) -> f64 {
    let n = engagement_mass(e);
    let p = positive_ratio(e);
    let prob = if n <= 0.0 {
        p_controversial(0.0)
    } else {
        let controversial = p_controversial(n).clamp(0.0, 1.0);
        let good = good_limit(n);
        let bad = bad_limit(n);
        if p >= good {
            1.0
        } else if p > 0.5 {
            let t = ((good - p) / (good - 0.5)).clamp(0.0, 1.0);
            1.0 - (1.0 - controversial) * t.powf(STEEPNESS_EXPONENT)
        } else if p < bad {
            0.0
        } else {
            let t = ((p - bad) / (0.5 - bad)).clamp(0.0, 1.0);
            controversial * t.powf(STEEPNESS_EXPONENT)
        }
    };
    if prob.is_nan() { 0.0 } else { prob.clamp(0.0, 1.0) }
}

/// Walk candidates best rank first and draw each into the hand with its
/// surfacing probability until the hand is full. Returns `(hand, rest)`.
pub fn choose_hand<R: Rng + ?Sized>(mut candidates: Vec<PopularRankEntry>, rng: &mut R) -> (Vec<Uuid>, Vec<Uuid>) {
    candidates.sort_by(|a, b| b.rank().total_cmp(&a.rank()));
    let mut hand = Vec::with_capacity(HAND_SIZE.min(candidates.len()));
    let mut rest = Vec::with_capacity(candidates.len());
    for entry in candidates {
        if hand.len() < HAND_SIZE && rng.random::<f64>() < p_surface(&entry) {
            hand.push(entry.card_id);
        } else {
            rest.push(entry.card_id);
        }
    }
    (hand, rest)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::DateTime;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn entry(up: i64, down: i64, comments: i64, views: i64) -> PopularRankEntry {
        let mut e = PopularRankEntry::new(Uuid::new_v4(), DateTime::from_timestamp(1_600_000_000, 0).unwrap());
        e.upvotes = up;
        e.downvotes = down;
        e.comments = comments;
        e.views = views;
        e
    }

    #[test]
    fn test_fresh_card_is_a_coin_flip() {
        assert_eq!(p_surface(&entry(0, 0, 0, 0)), 0.5);
    }

    #[test]
    fn test_liked_card_always_surfaces() {
        assert_eq!(p_surface(&entry(40, 0, 10, 60)), 1.0);
    }

    #[test]
    fn test_disliked_card_never_surfaces() {
        assert_eq!(p_surface(&entry(0, 30, 0, 40)), 0.0);
    }

    #[test]
    fn test_probability_stays_in_range() {
        for up in 0..20 {
            for down in 0..20 {
                for views in [0, 5, 50, 500] {
                    let p = p_surface(&entry(up, down, up % 3, views));
                    assert!((0.0..=1.0).contains(&p), "p={} for up={} down={}", p, up, down);
                }
            }
        }
        let mut e = entry(0, 0, 0, 0);
        e.score_mod = -1e12;
        assert_eq!(p_surface(&e), 0.0);
        e.score_mod = 1e12;
        assert_eq!(p_surface(&e), 1.0);
    }

    #[test]
    fn test_empty_hand() {
        let mut rng = StdRng::seed_from_u64(7);
        let (hand, rest) = choose_hand(Vec::new(), &mut rng);
        assert!(hand.is_empty());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_hand_partitions_input() {
        let candidates: Vec<_> = (0..40).map(|i| entry(i % 7, i % 3, i % 5, i)).collect();
        let ids: HashSet<_> = candidates.iter().map(|e| e.card_id).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let (hand, rest) = choose_hand(candidates, &mut rng);
        assert!(hand.len() <= HAND_SIZE);
        assert_eq!(hand.len() + rest.len(), ids.len());
        let seen: HashSet<_> = hand.iter().chain(rest.iter()).copied().collect();
        assert_eq!(seen, ids);
    }

    #[test]
    fn test_hand_is_deterministic_for_seed() {
        let candidates: Vec<_> = (0..30).map(|i| entry(i % 4, i % 2, 0, i)).collect();
        let first = choose_hand(candidates.clone(), &mut StdRng::seed_from_u64(9));
        let second = choose_hand(candidates, &mut StdRng::seed_from_u64(9));
        assert_eq!(first, second);
    }

    #[test]
    fn test_full_hand_takes_best_ranked() {
        let mut candidates: Vec<_> = (0..15).map(|_| entry(40, 0, 10, 60)).collect();
        for (i, e) in candidates.iter_mut().enumerate() {
            e.created_at_timestamp += i as i64 * 1000;
        }
        let newest: HashSet<_> = candidates[5..].iter().map(|e| e.card_id).collect();
        let (hand, rest) = choose_hand(candidates, &mut StdRng::seed_from_u64(1));
        assert_eq!(hand.len(), HAND_SIZE);
        assert_eq!(rest.len(), 5);
        assert!(hand.iter().all(|id| newest.contains(id)));
    }
}
