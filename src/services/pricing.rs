use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const LONG_DISTANCE_RATE: Decimal = dec!(3.50);
pub const MID_DISTANCE_RATE: Decimal = dec!(2.70);
pub const STANDARD_RATE: Decimal = dec!(2.50);
pub const PREMIUM_PICKUP_FEE: Decimal = dec!(15.00);
pub const OVERSIZED_ITEM_FEE: Decimal = dec!(25.00);
pub const EXTRA_PASSENGER_FEE: Decimal = dec!(5.00);
pub const MINIMUM_FARE: Decimal = dec!(100.00);

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PricingError {
    #[error("Invalid distance: {0} km")]
    InvalidDistance(Decimal),

    #[error("Invalid passenger count: {0}")]
    InvalidPassengers(i32),
}

/// A trip distance and whether it came from the routing service or the
/// configured fallback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDistance {
    pub km: Decimal,
    pub estimated: bool,
}

impl ResolvedDistance {
    pub fn measured(km: Decimal) -> Self {
        Self {
            km,
            estimated: false,
        }
    }

    pub fn estimated(km: Decimal) -> Self {
        Self {
            km,
            estimated: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingInput {
    pub distance: ResolvedDistance,
    pub passengers: i32,
    pub premium_pickup: bool,
    pub oversized_item: bool,
}

/// Price breakdown as stored on the booking and returned by quotes.
///
/// `rate_per_km` is the band rate actually applied, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub distance_km: Decimal,
    pub distance_estimated: bool,
    pub rate_per_km: Decimal,
    pub base_price: Decimal,
    pub premium_pickup_fee: Decimal,
    pub oversized_item_fee: Decimal,
    pub passenger_fee: Decimal,
    pub subtotal: Decimal,
    pub minimum_fare_applied: bool,
    pub total: Decimal,
}

/// Per-kilometre rate for a distance band.
///
/// - 100 km to 300 km inclusive: 3.50
/// - 75 km up to (not including) 100 km: 2.70
/// - everything else, including beyond 300 km: 2.50
pub fn rate_for_distance(km: Decimal) -> Decimal {
    if km >= dec!(100) && km <= dec!(300) {
        LONG_DISTANCE_RATE
    } else if km >= dec!(75) && km < dec!(100) {
        MID_DISTANCE_RATE
    } else {
        STANDARD_RATE
    }
}

/// Prices a trip. Intermediate values stay unrounded; every monetary
/// field is rounded to cents only when the breakdown is built.
pub fn calculate_price(input: &PricingInput) -> Result<PriceBreakdown, PricingError> {
    let km = input.distance.km;
    if km.is_sign_negative() {
        return Err(PricingError::InvalidDistance(km));
    }
    if input.passengers < 1 {
        return Err(PricingError::InvalidPassengers(input.passengers));
    }

    let rate = rate_for_distance(km);
    let base = km * rate;
    let premium_fee = if input.premium_pickup {
        PREMIUM_PICKUP_FEE
    } else {
        Decimal::ZERO
    };
    let oversized_fee = if input.oversized_item {
        OVERSIZED_ITEM_FEE
    } else {
        Decimal::ZERO
    };
    let extra_passengers = Decimal::from((input.passengers - 1).max(0));
    let passenger_fee = extra_passengers * EXTRA_PASSENGER_FEE;

    let subtotal = base + premium_fee + oversized_fee + passenger_fee;
    let minimum_fare_applied = subtotal < MINIMUM_FARE;
    let total = subtotal.max(MINIMUM_FARE);

    Ok(PriceBreakdown {
        distance_km: to_cents(km),
        distance_estimated: input.distance.estimated,
        rate_per_km: rate,
        base_price: to_cents(base),
        premium_pickup_fee: to_cents(premium_fee),
        oversized_item_fee: to_cents(oversized_fee),
        passenger_fee: to_cents(passenger_fee),
        subtotal: to_cents(subtotal),
        minimum_fare_applied,
        total: to_cents(total),
    })
}

fn to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(km: Decimal) -> PricingInput {
        PricingInput {
            distance: ResolvedDistance::measured(km),
            passengers: 1,
            premium_pickup: false,
            oversized_item: false,
        }
    }

    #[test]
    fn test_rate_bands_at_boundaries() {
        assert_eq!(rate_for_distance(dec!(74.99)), dec!(2.50));
        assert_eq!(rate_for_distance(dec!(75.00)), dec!(2.70));
        assert_eq!(rate_for_distance(dec!(99.99)), dec!(2.70));
        assert_eq!(rate_for_distance(dec!(100.00)), dec!(3.50));
        assert_eq!(rate_for_distance(dec!(300.00)), dec!(3.50));
        assert_eq!(rate_for_distance(dec!(300.01)), dec!(2.50));
        assert_eq!(rate_for_distance(Decimal::ZERO), dec!(2.50));
    }

    #[test]
    fn test_totals_at_boundaries() {
        let cases = [
            (dec!(74.99), dec!(187.48)),  // 187.475 rounds away from zero
            (dec!(75.00), dec!(202.50)),
            (dec!(99.99), dec!(269.97)),  // 269.973
            (dec!(100.00), dec!(350.00)),
            (dec!(300.00), dec!(1050.00)),
            (dec!(300.01), dec!(750.03)), // 750.025
        ];

        for (km, expected) in cases {
            let price = calculate_price(&input(km)).unwrap();
            assert_eq!(price.total, expected, "distance {} km", km);
            assert!(!price.minimum_fare_applied);
        }
    }

    #[test]
    fn test_minimum_fare_floor() {
        let price = calculate_price(&input(dec!(10))).unwrap();
        assert_eq!(price.base_price, dec!(25.00));
        assert_eq!(price.subtotal, dec!(25.00));
        assert_eq!(price.total, dec!(100.00));
        assert!(price.minimum_fare_applied);
    }

    #[test]
    fn test_add_ons_and_passengers() {
        let price = calculate_price(&PricingInput {
            distance: ResolvedDistance::measured(dec!(80)),
            passengers: 4,
            premium_pickup: true,
            oversized_item: true,
        })
        .unwrap();

        assert_eq!(price.rate_per_km, dec!(2.70));
        assert_eq!(price.base_price, dec!(216.00));
        assert_eq!(price.premium_pickup_fee, dec!(15.00));
        assert_eq!(price.oversized_item_fee, dec!(25.00));
        assert_eq!(price.passenger_fee, dec!(15.00));
        assert_eq!(price.total, dec!(271.00));
    }

    #[test]
    fn test_estimated_distance_is_flagged() {
        let price = calculate_price(&PricingInput {
            distance: ResolvedDistance::estimated(dec!(25)),
            ..input(Decimal::ZERO)
        })
        .unwrap();
        assert!(price.distance_estimated);
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert_eq!(
            calculate_price(&input(dec!(-1))),
            Err(PricingError::InvalidDistance(dec!(-1)))
        );
        assert_eq!(
            calculate_price(&PricingInput {
                passengers: 0,
                ..input(dec!(10))
            }),
            Err(PricingError::InvalidPassengers(0))
        );
    }

    #[test]
    fn test_rounding_happens_once() {
        let price = calculate_price(&PricingInput {
            distance: ResolvedDistance::measured(dec!(33.333)),
            passengers: 4,
            premium_pickup: true,
            oversized_item: false,
        })
        .unwrap();
        // 33.333 km * 2.50 = 83.3325, plus 15 premium and 15 passenger fees
        assert_eq!(price.total, dec!(113.33));
        assert_eq!(price.base_price, dec!(83.33));
    }

    proptest! {
        #[test]
        fn total_never_below_minimum_fare(
            cents in 0i64..100_000,
            passengers in 1i32..12,
            premium in any::<bool>(),
            oversized in any::<bool>(),
        ) {
            let price = calculate_price(&PricingInput {
                distance: ResolvedDistance::measured(Decimal::new(cents, 2)),
                passengers,
                premium_pickup: premium,
                oversized_item: oversized,
            }).unwrap();

            prop_assert!(price.total >= MINIMUM_FARE);
            if price.minimum_fare_applied {
                prop_assert_eq!(price.total, MINIMUM_FARE);
            }
        }

        #[test]
        fn applied_rate_matches_band(cents in 0i64..100_000) {
            let km = Decimal::new(cents, 2);
            let price = calculate_price(&input(km)).unwrap();
            let expected = if km >= dec!(100) && km <= dec!(300) {
                dec!(3.50)
            } else if km >= dec!(75) {
                if km < dec!(100) { dec!(2.70) } else { dec!(2.50) }
            } else {
                dec!(2.50)
            };
            prop_assert_eq!(price.rate_per_km, expected);
        }
    }
}
