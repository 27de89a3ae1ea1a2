//! True/False Problem Generation
//!
//! Every card shows a claim and the player answers true or false.
//! Arithmetic cards show `a op b = shown` where `shown` is the real result
//! about 60% of the time and a near-miss otherwise. Verification cards
//! (comparisons and fixed-text quiz questions) start appearing at higher
//! scores as a light anti-bot measure; their key is the literal answer.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Arithmetic operator shown in a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Addition
    #[serde(rename = "+")]
    Add,
    /// Subtraction
    #[serde(rename = "-")]
    Sub,
    /// Multiplication
    #[serde(rename = "×")]
    Mul,
    /// Whole-number division
    #[serde(rename = "÷")]
    Div,
    /// Small integer powers
    #[serde(rename = "^")]
    Pow,
    /// Square root of a perfect square
    #[serde(rename = "√")]
    Sqrt,
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "×",
            Op::Div => "÷",
            Op::Pow => "^",
            Op::Sqrt => "√",
        };
        f.write_str(symbol)
    }
}

/// A problem as shown to the player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    /// `a op b = shown` - is the shown result correct?
    /// `b` is absent for square roots.
    Statement {
        /// Left operand (the radicand for square roots).
        a: i64,
        /// Operator.
        op: Op,
        /// Right operand.
        b: Option<i64>,
        /// The claimed result.
        shown: i64,
    },
    /// `a > b` - true or false?
    Comparison {
        /// Left side.
        a: i64,
        /// Right side.
        b: i64,
    },
    /// Fixed-text true/false question.
    Quiz {
        /// The question text.
        text: String,
    },
}

/// A generated problem together with its answer key.
///
/// The key never leaves the server; only `problem` is sent to clients.
#[derive(Debug, Clone)]
pub struct ProblemCard {
    /// What the player sees.
    pub problem: Problem,
    /// The expected true/false response.
    pub answer: bool,
}

/// Internal: a statement before the true/false twist is applied.
struct Equation {
    a: i64,
    op: Op,
    b: Option<i64>,
    result: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Power,
    SquareRoot,
}

/// Score at which verification cards can start appearing.
const CHECK_MIN_SCORE: u32 = 15;

/// Chance of a verification card once past `CHECK_MIN_SCORE`.
const CHECK_CHANCE: f64 = 0.1;

/// Chance that the claimed result of a statement is the real one.
const TRUE_CHANCE: f64 = 0.6;

/// Quiz questions with their answer keys.
const QUIZ_QUESTIONS: &[(&str, bool)] = &[
    ("Is 100 smaller than 10?", false),
    ("Is 58 greater than 85?", false),
    ("Is -10 a positive number?", false),
    ("Is 99 equal to 99?", true),
    ("Is 0.5 less than 1?", true),
    ("Is 7 an odd number?", true),
    ("Is 12 an even number?", true),
    ("Is the result of 3+5 odd?", false),
    ("Is 15 a prime number?", false),
    ("Does a square have 4 equal sides?", true),
    ("Is Pi (π) exactly 3?", false),
    ("Does a triangle have 3 angles?", true),
    ("Are there two 7s in the number 717?", true),
    ("Does the number 1000 have three zeros?", true),
    ("Sequence: 2, 4, 6. Is the next number 8?", true),
    ("Sequence: 10, 20, 30. Is the next number 35?", false),
    ("Pattern: 5, 10, 15, 20. Is the next number 25?", true),
    ("Pattern: 9, 6, 3. Is the next number 0?", true),
];

/// Which statement kinds are available at this score, with pick weights.
/// Basic arithmetic gets demoted once the player is past the early game.
fn weighted_kinds(score: u32) -> Vec<(Kind, u32)> {
    let mut tiers = vec![(Kind::Addition, 5), (Kind::Subtraction, 5)];

    if score >= 5 {
        tiers.push((Kind::Multiplication, 6));
    }
    if score >= 15 {
        tiers.push((Kind::Division, 6));
    }
    if score >= 25 {
        tiers.push((Kind::Power, 4));
    }
    if score >= 35 {
        tiers.push((Kind::SquareRoot, 4));
    }

    if score > 20 {
        tiers[0].1 = 2;
        tiers[1].1 = 2;
    }

    tiers
}

fn pick_kind<R: Rng + ?Sized>(score: u32, rng: &mut R) -> Kind {
    let tiers = weighted_kinds(score);
    let total: u32 = tiers.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0..total);

    for (kind, weight) in &tiers {
        if roll < *weight {
            return *kind;
        }
        roll -= weight;
    }

    Kind::Addition
}

/// Build an equation of the given kind. Operand ranges scale with score.
fn build_equation<R: Rng + ?Sized>(kind: Kind, score: u32, rng: &mut R) -> Equation {
    let s = score as i64;

    match kind {
        Kind::Addition => {
            let a = rng.gen_range(s + 5..=s * 2 + 20);
            let b = rng.gen_range(s + 5..=s * 2 + 20);
            Equation { a, op: Op::Add, b: Some(b), result: a + b }
        }
        Kind::Subtraction => {
            let x = rng.gen_range(s + 10..=s * 2 + 30);
            let y = rng.gen_range(s + 10..=s * 2 + 30);
            // Larger operand first, nudged apart so the result stays positive
            let (a, b) = if x > y { (x, y) } else { (y + 1, x) };
            Equation { a, op: Op::Sub, b: Some(b), result: a - b }
        }
        Kind::Multiplication => {
            let max_operand = 5 + s / 4;
            let min_operand = 2 + s / 10;
            let a = rng.gen_range(min_operand..=max_operand);
            let hi = max_operand.min(15).max(min_operand);
            let b = rng.gen_range(min_operand..=hi);
            Equation { a, op: Op::Mul, b: Some(b), result: a * b }
        }
        Kind::Division => {
            let max_divisor = 4 + s / 6;
            let min_divisor = 2 + s / 15;
            let result = rng.gen_range(min_divisor..=max_divisor);
            let b = rng.gen_range(min_divisor..=max_divisor);
            Equation { a: b * result, op: Op::Div, b: Some(b), result }
        }
        Kind::Power => {
            let max_base = if score > 50 { 12 } else { 8 };
            let min_base = if score > 40 { 3 } else { 2 };
            let base = rng.gen_range(min_base..=max_base);
            let exponent = *[2u32, 3].choose(rng).unwrap_or(&2);
            Equation {
                a: base,
                op: Op::Pow,
                b: Some(exponent as i64),
                result: base.pow(exponent),
            }
        }
        Kind::SquareRoot => {
            let max_root = 4 + s / 5;
            let min_root = 2 + s / 8;
            let result = rng.gen_range(min_root..=max_root);
            Equation { a: result * result, op: Op::Sqrt, b: None, result }
        }
    }
}

/// Perturb a result into a plausible near-miss: small delta scaled to the
/// magnitude of the truth, never negative, never the truth itself.
fn near_miss<R: Rng + ?Sized>(result: i64, rng: &mut R) -> i64 {
    let error_margin = result / 10 + rng.gen_range(1..=5);
    let delta = rng.gen_range(1..=error_margin.max(2));
    let mut shown = if rng.gen_bool(0.5) { result - delta } else { result + delta };

    if shown <= 0 {
        shown = result + 1;
    }
    if shown == result {
        shown += 1;
    }

    shown
}

fn verification_card<R: Rng + ?Sized>(rng: &mut R) -> ProblemCard {
    if rng.gen_bool(0.5) {
        let a = rng.gen_range(10..=99);
        let b = rng.gen_range(10..=99);
        ProblemCard {
            problem: Problem::Comparison { a, b },
            answer: a > b,
        }
    } else {
        let (text, answer) = *QUIZ_QUESTIONS.choose(rng).unwrap_or(&QUIZ_QUESTIONS[0]);
        ProblemCard {
            problem: Problem::Quiz { text: text.to_string() },
            answer,
        }
    }
}

/// Generate the next card for a player at the given score.
pub fn generate<R: Rng + ?Sized>(score: u32, rng: &mut R) -> ProblemCard {
    if score >= CHECK_MIN_SCORE && rng.gen_bool(CHECK_CHANCE) {
        return verification_card(rng);
    }

    let equation = build_equation(pick_kind(score, rng), score, rng);
    let answer = rng.gen_bool(TRUE_CHANCE);
    let shown = if answer {
        equation.result
    } else {
        near_miss(equation.result, rng)
    };

    ProblemCard {
        problem: Problem::Statement {
            a: equation.a,
            op: equation.op,
            b: equation.b,
            shown,
        },
        answer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Recompute the true result of a statement.
    fn eval(a: i64, op: Op, b: Option<i64>) -> i64 {
        match op {
            Op::Add => a + b.unwrap(),
            Op::Sub => a - b.unwrap(),
            Op::Mul => a * b.unwrap(),
            Op::Div => a / b.unwrap(),
            Op::Pow => a.pow(b.unwrap() as u32),
            Op::Sqrt => {
                let r = (a as f64).sqrt().round() as i64;
                assert_eq!(r * r, a, "radicand must be a perfect square");
                r
            }
        }
    }

    #[test]
    fn test_answer_key_matches_statement_truth() {
        let mut rng = StdRng::seed_from_u64(7);

        for score in [0u32, 10, 30, 60] {
            for _ in 0..300 {
                let card = generate(score, &mut rng);
                if let Problem::Statement { a, op, b, shown } = card.problem {
                    let truth = eval(a, op, b);
                    assert_eq!(card.answer, shown == truth, "score={score} a={a} {op} b={b:?} shown={shown}");
                    assert!(shown > 0, "claimed result must stay positive");
                }
            }
        }
    }

    #[test]
    fn test_low_scores_only_get_basic_arithmetic() {
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..300 {
            let card = generate(0, &mut rng);
            match card.problem {
                Problem::Statement { op, .. } => {
                    assert!(matches!(op, Op::Add | Op::Sub), "unexpected op {op} at score 0");
                }
                other => panic!("verification card at score 0: {other:?}"),
            }
        }
    }

    #[test]
    fn test_division_always_whole_and_subtraction_non_negative() {
        let mut rng = StdRng::seed_from_u64(13);

        for _ in 0..500 {
            let card = generate(45, &mut rng);
            if let Problem::Statement { a, op, b, .. } = card.problem {
                match op {
                    Op::Div => assert_eq!(a % b.unwrap(), 0),
                    Op::Sub => assert!(a >= b.unwrap()),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_verification_cards_appear_past_threshold() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut seen_check = false;

        for _ in 0..1000 {
            let card = generate(CHECK_MIN_SCORE, &mut rng);
            match card.problem {
                Problem::Comparison { a, b } => {
                    assert_eq!(card.answer, a > b);
                    seen_check = true;
                }
                Problem::Quiz { ref text } => {
                    assert!(!text.is_empty());
                    seen_check = true;
                }
                Problem::Statement { .. } => {}
            }
        }

        // ~10% per card over 1000 draws
        assert!(seen_check, "no verification card in 1000 draws");
    }

    #[test]
    fn test_weight_demotion_past_early_game() {
        let tiers = weighted_kinds(25);
        assert_eq!(tiers[0], (Kind::Addition, 2));
        assert_eq!(tiers[1], (Kind::Subtraction, 2));
        assert!(tiers.contains(&(Kind::Power, 4)));
        assert!(!tiers.iter().any(|(k, _)| *k == Kind::SquareRoot));
    }

    #[test]
    fn test_problem_serialization_shape() {
        let problem = Problem::Statement { a: 6, op: Op::Mul, b: Some(7), shown: 42 };
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["kind"], "statement");
        assert_eq!(json["op"], "×");
        assert_eq!(json["shown"], 42);
    }
}
