//! Seeded property sweeps over the fee computer and the engine.
//!
//! For every generated plan, history and amount:
//!   - 0 <= fee <= |amount|
//!   - fee is a whole number of cents and is 0 or at least 0.01
//!   - the ratio stays under the ceiling of the bucket that priced it
//!   - stored amount = requested amount - fee
//!   - the same inputs always price the same

use feebook_core::{
    compute_fee,
    config::EngineConfig,
    engine::FeeEngine,
    plan::{CalibrationPoint, FeePlan, FeeSchedule, IntervalCalibration},
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

const SEED: u64 = 0xFEE5;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A random amount with two decimal places, either sign.
fn random_amount(rng: &mut Pcg64Mcg) -> Decimal {
    let cents: i64 = rng.gen_range(-1_000_000..=1_000_000);
    Decimal::new(cents, 2)
}

fn random_plan(rng: &mut Pcg64Mcg) -> FeePlan {
    let mut plan = FeePlan::default_for(1, &EngineConfig::default_test());
    plan.max_fee_ratio = Decimal::new(rng.gen_range(0..=100), 2);

    plan.schedule = if rng.gen_bool(0.5) {
        let mut intervals = Vec::new();
        let mut edge = Decimal::ZERO;
        for _ in 0..rng.gen_range(0..5) {
            intervals.push(edge);
            edge += Decimal::new(rng.gen_range(1..50_000), 2);
        }
        let mut calibration = BTreeMap::new();
        for limit in std::iter::once(Decimal::ZERO).chain(intervals.iter().copied()) {
            if rng.gen_bool(0.3) {
                continue;
            }
            let max_fee_ratio = if rng.gen_bool(0.5) {
                let cap = (plan.max_fee_ratio * dec!(100)).to_i64().unwrap_or(0);
                Some(Decimal::new(rng.gen_range(0..=cap), 2))
            } else {
                None
            };
            let points = (0..rng.gen_range(0..8))
                .map(|_| CalibrationPoint {
                    frequency: rng.gen_range(0.0..=1.0),
                    ratio:     rng.gen_range(-0.2..1.5),
                })
                .collect();
            calibration.insert(limit, IntervalCalibration { max_fee_ratio, points });
        }
        FeeSchedule::AmountTable { intervals, calibration }
    } else {
        let formulas = [
            "x * y / 1000",
            "0.03",
            "max(0, 0.1 - y)",
            "sqrt(x) / 100",
            "2",
            "-1",
            "1 / y",
            "log(x)",
            "y ** 3",
        ];
        FeeSchedule::Formula {
            expression: formulas[rng.gen_range(0..formulas.len())].to_string(),
        }
    };
    plan
}

fn assert_fee_invariants(amount: Decimal, fee: Decimal) {
    assert!(fee >= Decimal::ZERO, "negative fee {fee} for {amount}");
    assert!(fee <= amount.abs(), "fee {fee} exceeds |{amount}|");
    assert_eq!(fee, fee.round_dp(2), "fee {fee} is not whole cents");
    assert!(fee == Decimal::ZERO || fee >= dec!(0.01));
}

#[test]
fn computed_fees_stay_in_bounds() {
    init_logging();
    let mut rng = Pcg64Mcg::seed_from_u64(SEED);

    for _ in 0..2_000 {
        let plan = random_plan(&mut rng);
        let history: Vec<Decimal> = (0..rng.gen_range(0..12))
            .map(|_| random_amount(&mut rng))
            .collect();
        let amount = random_amount(&mut rng);

        let quote = compute_fee(amount, &plan, &history);
        assert_fee_invariants(amount, quote.fee);
        assert!((0.0..=1.0).contains(&quote.frequency));
        assert!(quote.ratio >= Decimal::ZERO && quote.ratio <= plan.max_fee_ratio);
        let bucket = plan.bucket_calibration(amount.abs());
        assert!(quote.ratio <= bucket.ceiling, "{quote:?} above {bucket:?}");

        assert_eq!(compute_fee(amount, &plan, &history), quote);
    }
}

#[test]
fn stored_amount_is_requested_minus_fee() {
    init_logging();
    let mut rng = Pcg64Mcg::seed_from_u64(SEED ^ 0xA11CE);
    let engine = FeeEngine::build_test().unwrap();

    for user_id in 1..=5 {
        let mut plan = random_plan(&mut rng);
        plan.user_id = user_id;
        engine.save_fee_plan(plan).unwrap();
    }

    let mut items = Vec::new();
    for _ in 0..200 {
        let user_id = rng.gen_range(1..=5);
        let amount = random_amount(&mut rng);

        let out = if !items.is_empty() && rng.gen_bool(0.3) {
            let id = items[rng.gen_range(0..items.len())];
            engine.update_payment_amount(id, amount).unwrap()
        } else {
            let out = engine.create_payment_item(user_id, amount, None).unwrap();
            items.push(out.item.item_id);
            out
        };

        assert_fee_invariants(amount, out.fee);
        assert_eq!(out.item.amount, amount - out.fee);
        match engine.fee_record(out.item.item_id).unwrap() {
            Some(record) => {
                assert_eq!(record.fee_amount, out.fee);
                assert_eq!(record.original_amount, amount);
            }
            None => assert_eq!(out.fee, Decimal::ZERO),
        }
    }
}
