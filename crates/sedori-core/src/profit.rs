use rust_decimal::{Decimal, RoundingStrategy};
use sedori_types::{FeeBreakdown, ProfitAnalysis, SedoriError, SedoriResult};

/// Compute profit, ROI and margin for a candidate purchase.
///
/// Pure function over exact decimal arithmetic: money is quantized half-up to
/// `rounding` and ratios to four fractional digits. The quantized fee
/// components replace the input breakdown in the result.
pub fn calculate_profit(
    selling_price: Decimal,
    purchase_cost: Decimal,
    fees: &FeeBreakdown,
    rounding: Decimal,
) -> SedoriResult<ProfitAnalysis> {
    let fees = quantize_fees(fees, rounding)?;
    let total_fees = fees.total();

    let total_cost = purchase_cost
        .checked_add(total_fees)
        .ok_or_else(|| SedoriError::ProfitComputation("total cost overflow".to_string()))?;
    let profit = selling_price
        .checked_sub(total_cost)
        .ok_or_else(|| SedoriError::ProfitComputation("profit overflow".to_string()))?;
    let roi = safe_divide(profit, purchase_cost)?;
    let margin = safe_divide(profit, selling_price)?;

    Ok(ProfitAnalysis {
        selling_price: quantize(selling_price, rounding)?,
        purchase_cost: quantize(purchase_cost, rounding)?,
        total_cost: quantize(total_cost, rounding)?,
        profit: quantize(profit, rounding)?,
        roi: quantize_ratio(roi),
        margin: quantize_ratio(margin),
        fees,
    })
}

/// Round `value` half-up to the given quantum (e.g. 0.01 or 1).
pub fn quantize(value: Decimal, quantum: Decimal) -> SedoriResult<Decimal> {
    if quantum <= Decimal::ZERO {
        return Err(SedoriError::ProfitComputation(format!(
            "invalid rounding quantum: {quantum}"
        )));
    }
    let steps = value
        .checked_div(quantum)
        .ok_or_else(|| SedoriError::ProfitComputation("quantization overflow".to_string()))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    steps
        .checked_mul(quantum)
        .ok_or_else(|| SedoriError::ProfitComputation("quantization overflow".to_string()))
}

fn quantize_ratio(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

fn safe_divide(numerator: Decimal, denominator: Decimal) -> SedoriResult<Decimal> {
    if denominator == Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    numerator
        .checked_div(denominator)
        .ok_or_else(|| SedoriError::ProfitComputation("division overflow".to_string()))
}

fn quantize_fees(fees: &FeeBreakdown, quantum: Decimal) -> SedoriResult<FeeBreakdown> {
    Ok(FeeBreakdown {
        referral_fee: quantize(fees.referral_fee, quantum)?,
        closing_fee: quantize(fees.closing_fee, quantum)?,
        fba_fee: quantize(fees.fba_fee, quantum)?,
        inbound_shipping: quantize(fees.inbound_shipping, quantum)?,
        packaging_materials: quantize(fees.packaging_materials, quantum)?,
        storage_fee: quantize(fees.storage_fee, quantum)?,
        taxes: quantize(fees.taxes, quantum)?,
        fx_spread: quantize(fees.fx_spread, quantum)?,
        returns_cost: quantize(fees.returns_cost, quantum)?,
        other_costs: quantize(fees.other_costs, quantum)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fees() -> FeeBreakdown {
        FeeBreakdown {
            referral_fee: dec!(150),
            closing_fee: dec!(80),
            fba_fee: dec!(300),
            inbound_shipping: dec!(200),
            taxes: dec!(50),
            ..FeeBreakdown::default()
        }
    }

    #[test]
    fn computes_expected_metrics() {
        let analysis = calculate_profit(dec!(2500), dec!(1200), &fees(), dec!(0.01)).unwrap();

        assert_eq!(analysis.total_cost, dec!(1980.00));
        assert_eq!(analysis.profit, dec!(520.00));
        assert_eq!(analysis.roi, dec!(0.4333));
        assert_eq!(analysis.margin, dec!(0.2080));
    }

    #[test]
    fn profit_equals_selling_minus_cost_minus_fees() {
        let analysis = calculate_profit(dec!(4800), dec!(2400), &fees(), dec!(0.01)).unwrap();
        assert_eq!(
            analysis.profit,
            analysis.selling_price - analysis.purchase_cost - analysis.fees.total()
        );
    }

    #[test]
    fn fee_total_matches_component_sum_after_quantization() {
        let uneven = FeeBreakdown {
            referral_fee: dec!(0.005),
            fba_fee: dec!(1.014),
            ..FeeBreakdown::default()
        };
        let analysis = calculate_profit(dec!(100), dec!(50), &uneven, dec!(0.01)).unwrap();
        assert_eq!(analysis.fees.referral_fee, dec!(0.01));
        assert_eq!(analysis.fees.fba_fee, dec!(1.01));
        assert_eq!(analysis.fees.total(), dec!(1.02));
    }

    #[test]
    fn zero_denominators_produce_zero_ratios() {
        let analysis =
            calculate_profit(dec!(0), dec!(0), &FeeBreakdown::default(), dec!(0.01)).unwrap();
        assert_eq!(analysis.roi, dec!(0));
        assert_eq!(analysis.margin, dec!(0));
    }

    #[test]
    fn integer_quantum_rounds_to_whole_units() {
        let analysis = calculate_profit(dec!(2500.4), dec!(1200.5), &fees(), dec!(1)).unwrap();
        assert_eq!(analysis.selling_price, dec!(2500));
        assert_eq!(analysis.purchase_cost, dec!(1201));
    }

    #[test]
    fn half_up_rounding_of_midpoints() {
        assert_eq!(quantize(dec!(1.005), dec!(0.01)).unwrap(), dec!(1.01));
        assert_eq!(quantize(dec!(2.5), dec!(1)).unwrap(), dec!(3));
        assert_eq!(quantize(dec!(-2.5), dec!(1)).unwrap(), dec!(-3));
    }

    #[test]
    fn rejects_non_positive_quantum() {
        assert!(quantize(dec!(1), dec!(0)).is_err());
        assert!(quantize(dec!(1), dec!(-0.01)).is_err());
    }
}
