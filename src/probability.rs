//! American-odds probability math: implied and no-vig probabilities, edge,
//! Kelly sizing and parlay pricing.

use serde::Serialize;

use crate::error::{Result, ServiceError};

/// Fraction of full Kelly actually staked.
pub const KELLY_FRACTION: f64 = 0.25;

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn check_probability(p: f64, what: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&p) || p.is_nan() {
        return Err(ServiceError::InvalidInput(format!(
            "{} must be between 0 and 1, got {}",
            what, p
        )));
    }
    Ok(())
}

fn check_odds(odds: i32) -> Result<()> {
    if odds == 0 {
        return Err(ServiceError::InvalidInput(
            "American odds cannot be 0".to_string(),
        ));
    }
    Ok(())
}

/// Implied probability of American odds, rounded to 4 places.
pub fn implied_probability(odds: i32) -> f64 {
    let o = odds as f64;
    if odds > 0 {
        round_to(100.0 / (o + 100.0), 4)
    } else {
        round_to(o.abs() / (o.abs() + 100.0), 4)
    }
}

/// Unrounded implied probability; `None` for the meaningless price 0.
pub fn american_to_prob(odds: i32) -> Option<f64> {
    if odds == 0 {
        return None;
    }
    let o = odds as f64;
    Some(if odds > 0 {
        100.0 / (o + 100.0)
    } else {
        -o / (-o + 100.0)
    })
}

pub fn american_to_decimal(odds: i32) -> f64 {
    let o = odds as f64;
    if odds > 0 {
        o / 100.0 + 1.0
    } else {
        100.0 / o.abs() + 1.0
    }
}

/// Fair American price for a probability. Returns 0 outside (0, 1).
pub fn prob_to_american(p: f64) -> i32 {
    if p <= 0.0 || p >= 1.0 {
        return 0;
    }
    if p >= 0.5 {
        (-100.0 * p / (1.0 - p)).round() as i32
    } else {
        (100.0 * (1.0 - p) / p).round() as i32
    }
}

/// Remove the bookmaker margin from a two-sided market.
pub fn no_vig_two_way(over: i32, under: i32) -> Option<(f64, f64)> {
    let p_over = american_to_prob(over)?;
    let p_under = american_to_prob(under)?;
    let total = p_over + p_under;
    if total <= 0.0 {
        return None;
    }
    Some((round_to(p_over / total, 4), round_to(p_under / total, 4)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub true_prob: f64,
    pub book_odds: i32,
    pub implied_prob: f64,
    /// Percentage points.
    pub edge: f64,
}

pub fn calculate_edge(true_prob: f64, book_odds: i32) -> Result<Edge> {
    check_probability(true_prob, "true probability")?;
    check_odds(book_odds)?;
    let implied_prob = implied_probability(book_odds);
    Ok(Edge {
        true_prob,
        book_odds,
        implied_prob,
        edge: round_to((true_prob - implied_prob) * 100.0, 2),
    })
}

/// Quarter-Kelly stake in bankroll units, never negative.
pub fn kelly_bet_size(prob: f64, odds: i32, bankroll: f64) -> Result<f64> {
    check_probability(prob, "probability")?;
    check_odds(odds)?;
    if bankroll.is_nan() || bankroll <= 0.0 {
        return Err(ServiceError::InvalidInput(
            "bankroll must be positive".to_string(),
        ));
    }

    // f = (bp - q) / b
    let b = american_to_decimal(odds) - 1.0;
    let kelly = if b > 0.0 { (prob * b - (1.0 - prob)) / b } else { 0.0 };
    Ok(round_to(bankroll * kelly * KELLY_FRACTION, 2).max(0.0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParlayEdge {
    /// Percent, 2 places.
    pub combined_prob: f64,
    /// Fair decimal odds of the combined legs.
    pub true_odds: f64,
    pub book_odds: i32,
    pub decimal_book_odds: f64,
    /// Fair decimal odds minus book decimal odds. Negative when the book
    /// pays more than the fair price.
    pub edge: f64,
}

pub fn parlay_edge(probabilities: &[f64], book_odds: i32) -> Result<ParlayEdge> {
    if probabilities.is_empty() {
        return Err(ServiceError::InvalidInput(
            "parlay needs at least one leg".to_string(),
        ));
    }
    for p in probabilities {
        check_probability(*p, "leg probability")?;
    }
    check_odds(book_odds)?;

    let combined: f64 = probabilities.iter().product();
    if combined <= 0.0 {
        return Err(ServiceError::InvalidInput(
            "parlay with a zero-probability leg has no fair price".to_string(),
        ));
    }
    let true_odds = 1.0 / combined;
    let decimal_book_odds = american_to_decimal(book_odds);

    Ok(ParlayEdge {
        combined_prob: round_to(combined * 100.0, 2),
        true_odds: round_to(true_odds, 2),
        book_odds,
        decimal_book_odds: round_to(decimal_book_odds, 2),
        edge: round_to(true_odds - decimal_book_odds, 2),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implied_probability() {
        assert_eq!(implied_probability(100), 0.5);
        assert_eq!(implied_probability(-110), 0.5238);
        assert_eq!(implied_probability(150), 0.4);
    }

    #[test]
    fn test_no_vig_removes_margin() {
        let (over, under) = no_vig_two_way(-110, -110).unwrap();
        assert_eq!(over, 0.5);
        assert_eq!(under, 0.5);

        let (over, under) = no_vig_two_way(-150, 130).unwrap();
        assert!(over > under);
        assert!((over + under - 1.0).abs() < 1e-3);
        assert!(no_vig_two_way(0, -110).is_none());
    }

    #[test]
    fn test_prob_to_american() {
        assert_eq!(prob_to_american(0.5), -100);
        assert_eq!(prob_to_american(0.6), -150);
        assert_eq!(prob_to_american(0.4), 150);
        assert_eq!(prob_to_american(1.0), 0);
    }

    #[test]
    fn test_edge() {
        let e = calculate_edge(0.55, 100).unwrap();
        assert_eq!(e.implied_prob, 0.5);
        assert_eq!(e.edge, 5.0);
        assert!(calculate_edge(1.2, 100).is_err());
    }

    #[test]
    fn test_kelly_quarter_stake() {
        // Even money, 55%: full Kelly 10%, quarter Kelly 2.5%.
        assert_eq!(kelly_bet_size(0.55, 100, 1000.0).unwrap(), 25.0);
        // Negative expectation never stakes.
        assert_eq!(kelly_bet_size(0.40, 100, 1000.0).unwrap(), 0.0);
        assert!(kelly_bet_size(0.55, 100, 0.0).is_err());
        assert!(kelly_bet_size(0.55, 0, 100.0).is_err());
    }

    #[test]
    fn test_parlay_edge() {
        let p = parlay_edge(&[0.5, 0.5], 300).unwrap();
        assert_eq!(p.combined_prob, 25.0);
        assert_eq!(p.true_odds, 4.0);
        assert_eq!(p.decimal_book_odds, 4.0);
        assert_eq!(p.edge, 0.0);
        assert!(parlay_edge(&[], 300).is_err());
    }

    #[test]
    fn test_parlay_edge_is_fair_minus_book() {
        // Fair 3.03 against a +264 (3.64) payout.
        let p = parlay_edge(&[0.6, 0.55], 264).unwrap();
        assert_eq!(p.true_odds, 3.03);
        assert_eq!(p.decimal_book_odds, 3.64);
        assert_eq!(p.edge, -0.61);

        // Book shorter than fair: positive.
        let p = parlay_edge(&[0.6, 0.55], 150).unwrap();
        assert_eq!(p.edge, 0.53);
    }
}
