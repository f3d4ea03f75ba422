use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerType;
use crate::errors::DomainError;

pub const DEFAULT_CURRENCY_SCALE: u32 = 2;

/// Default markup percentage applied per customer type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupTiers {
    pub retail: Decimal,
    pub wholesale: Decimal,
}

impl Default for MarkupTiers {
    fn default() -> Self {
        Self { retail: Decimal::new(70, 0), wholesale: Decimal::new(40, 0) }
    }
}

impl MarkupTiers {
    pub fn for_customer(&self, customer_type: CustomerType) -> Decimal {
        match customer_type {
            CustomerType::Retail => self.retail,
            CustomerType::Wholesale => self.wholesale,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePrice {
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationTotals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

pub fn round_currency(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

pub fn compute_line_item(
    cost_price: Decimal,
    quantity: u32,
    markup_percent: Decimal,
    scale: u32,
) -> Result<LinePrice, DomainError> {
    if quantity == 0 {
        return Err(DomainError::invalid_input("quantity", "quantity must be greater than zero"));
    }
    if cost_price < Decimal::ZERO {
        return Err(DomainError::invalid_input(
            "cost_price",
            format!("cost price {cost_price} must not be negative"),
        ));
    }
    if markup_percent < Decimal::ZERO {
        return Err(DomainError::invalid_input(
            "markup",
            format!("markup {markup_percent} must not be negative"),
        ));
    }

    let factor = markup_percent
        .checked_div(Decimal::ONE_HUNDRED)
        .and_then(|ratio| ratio.checked_add(Decimal::ONE))
        .ok_or_else(|| out_of_range("markup", markup_percent))?;
    let unit_price = round_currency(
        cost_price.checked_mul(factor).ok_or_else(|| out_of_range("cost_price", cost_price))?,
        scale,
    );
    let line_total = unit_price
        .checked_mul(Decimal::from(quantity))
        .ok_or_else(|| out_of_range("quantity", quantity))?;

    Ok(LinePrice { unit_price, line_total })
}

pub fn compute_totals<I>(
    line_totals: I,
    discount_percentage: Decimal,
    tax_rate_percent: Decimal,
    scale: u32,
) -> Result<QuotationTotals, DomainError>
where
    I: IntoIterator<Item = Decimal>,
{
    if discount_percentage < Decimal::ZERO || discount_percentage > Decimal::ONE_HUNDRED {
        return Err(DomainError::invalid_input(
            "discount_percentage",
            format!("discount {discount_percentage} must be within 0..=100"),
        ));
    }
    if tax_rate_percent < Decimal::ZERO {
        return Err(DomainError::invalid_input(
            "tax_rate",
            format!("tax rate {tax_rate_percent} must not be negative"),
        ));
    }

    let subtotal = line_totals
        .into_iter()
        .try_fold(Decimal::ZERO, |sum, line_total| sum.checked_add(line_total))
        .ok_or_else(|| out_of_range("subtotal", "sum of line totals"))?;
    let discount_amount = round_currency(
        percent_of(subtotal, discount_percentage)
            .ok_or_else(|| out_of_range("discount_amount", subtotal))?,
        scale,
    );
    let taxable = subtotal - discount_amount;
    let tax_amount = round_currency(
        percent_of(taxable, tax_rate_percent).ok_or_else(|| out_of_range("tax_amount", taxable))?,
        scale,
    );
    let total_amount = taxable
        .checked_add(tax_amount)
        .ok_or_else(|| out_of_range("total_amount", taxable))?;

    Ok(QuotationTotals { subtotal, discount_amount, tax_amount, total_amount })
}

fn percent_of(value: Decimal, percent: Decimal) -> Option<Decimal> {
    value.checked_mul(percent)?.checked_div(Decimal::ONE_HUNDRED)
}

fn out_of_range(field: &str, value: impl std::fmt::Display) -> DomainError {
    DomainError::invalid_input(field, format!("{value} exceeds the supported monetary range"))
}

/// Pricing inputs fixed by configuration: markup tiers, tax rate and rounding scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingCalculator {
    pub markups: MarkupTiers,
    pub tax_rate_percent: Decimal,
    pub currency_scale: u32,
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self {
            markups: MarkupTiers::default(),
            tax_rate_percent: Decimal::new(5, 0),
            currency_scale: DEFAULT_CURRENCY_SCALE,
        }
    }
}

impl PricingCalculator {
    /// Item override wins over the customer tier.
    pub fn markup_for(
        &self,
        customer_type: CustomerType,
        item_override: Option<Decimal>,
    ) -> Decimal {
        item_override.unwrap_or_else(|| self.markups.for_customer(customer_type))
    }

    pub fn price_line(
        &self,
        cost_price: Decimal,
        quantity: u32,
        markup_percent: Decimal,
    ) -> Result<LinePrice, DomainError> {
        compute_line_item(cost_price, quantity, markup_percent, self.currency_scale)
    }

    pub fn totals<I>(
        &self,
        line_totals: I,
        discount_percentage: Decimal,
        tax_rate_percent: Decimal,
    ) -> Result<QuotationTotals, DomainError>
    where
        I: IntoIterator<Item = Decimal>,
    {
        compute_totals(line_totals, discount_percentage, tax_rate_percent, self.currency_scale)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{compute_line_item, compute_totals, MarkupTiers, PricingCalculator};
    use crate::domain::customer::CustomerType;
    use crate::errors::DomainError;

    #[test]
    fn retail_line_uses_seventy_percent_markup() {
        let calculator = PricingCalculator::default();
        let markup = calculator.markup_for(CustomerType::Retail, None);
        let line = calculator.price_line(Decimal::new(100, 0), 2, markup).expect("price line");

        assert_eq!(line.unit_price, Decimal::new(170, 0));
        assert_eq!(line.line_total, Decimal::new(340, 0));
    }

    #[test]
    fn item_override_replaces_customer_tier() {
        let calculator = PricingCalculator::default();
        assert_eq!(
            calculator.markup_for(CustomerType::Wholesale, Some(Decimal::new(15, 0))),
            Decimal::new(15, 0)
        );
        assert_eq!(
            calculator.markup_for(CustomerType::Wholesale, None),
            MarkupTiers::default().wholesale
        );
    }

    #[test]
    fn unit_price_rounds_half_up_to_currency_scale() {
        // 0.15 * 1.7 = 0.255
        let line = compute_line_item(Decimal::new(15, 2), 3, Decimal::new(70, 0), 2)
            .expect("price line");
        assert_eq!(line.unit_price, Decimal::new(26, 2));
        assert_eq!(line.line_total, Decimal::new(78, 2));
    }

    #[test]
    fn totals_apply_discount_before_tax() {
        let totals = compute_totals(
            [Decimal::new(340, 0), Decimal::new(660, 0)],
            Decimal::new(10, 0),
            Decimal::new(5, 0),
            2,
        )
        .expect("totals");

        assert_eq!(totals.subtotal, Decimal::new(1000, 0));
        assert_eq!(totals.discount_amount, Decimal::new(100, 0));
        assert_eq!(totals.tax_amount, Decimal::new(45, 0));
        assert_eq!(totals.total_amount, Decimal::new(945, 0));
        assert_eq!(
            totals.total_amount,
            totals.subtotal - totals.discount_amount + totals.tax_amount
        );
    }

    #[test]
    fn scenario_single_retail_item_totals_to_357() {
        let line = compute_line_item(Decimal::new(100, 0), 2, Decimal::new(70, 0), 2)
            .expect("price line");
        let totals = compute_totals([line.line_total], Decimal::ZERO, Decimal::new(5, 0), 2)
            .expect("totals");

        assert_eq!(totals.subtotal, Decimal::new(340, 0));
        assert_eq!(totals.tax_amount, Decimal::new(17, 0));
        assert_eq!(totals.total_amount, Decimal::new(357, 0));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(matches!(
            compute_line_item(Decimal::ONE, 0, Decimal::ZERO, 2),
            Err(DomainError::InvalidInput { ref field, .. }) if field == "quantity"
        ));
        assert!(compute_line_item(Decimal::new(-1, 0), 1, Decimal::ZERO, 2).is_err());
        assert!(compute_line_item(Decimal::ONE, 1, Decimal::new(-5, 0), 2).is_err());
        assert!(compute_totals([Decimal::ONE], Decimal::new(101, 0), Decimal::ZERO, 2).is_err());
        assert!(compute_totals([Decimal::ONE], Decimal::ZERO, Decimal::new(-1, 0), 2).is_err());
    }

    #[test]
    fn oversized_amounts_are_rejected_instead_of_overflowing() {
        let huge: Decimal = "50000000000000000000000000000".parse().expect("decimal");
        let large: Decimal = "100000000000000000000".parse().expect("decimal");

        assert!(matches!(
            compute_line_item(huge, 1, Decimal::new(70, 0), 2),
            Err(DomainError::InvalidInput { ref field, .. }) if field == "cost_price"
        ));
        assert!(matches!(
            compute_line_item(large, u32::MAX, Decimal::ZERO, 2),
            Err(DomainError::InvalidInput { ref field, .. }) if field == "quantity"
        ));
        assert!(matches!(
            compute_totals([huge, huge], Decimal::ZERO, Decimal::ZERO, 2),
            Err(DomainError::InvalidInput { ref field, .. }) if field == "subtotal"
        ));
    }

    #[test]
    fn zero_cost_prices_to_zero() {
        let line = compute_line_item(Decimal::ZERO, 4, Decimal::new(70, 0), 2).expect("price line");
        assert_eq!(line.line_total, Decimal::ZERO);
    }
}
