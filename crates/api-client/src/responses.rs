use core_types::{MoneyValue, PortfolioSecurity};
use serde::{Deserialize, Serialize};

/// Diagnostic headers the broker attaches to responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// `x-ratelimit-remaining`: calls left in the current rate-limit window.
    pub ratelimit_remaining: Option<u32>,
    /// `message`: human readable reason supplied on error paths.
    pub message: Option<String>,
    /// `x-tracking-id`: identifier to quote to broker support.
    pub tracking_id: Option<String>,
}

impl ResponseMetadata {
    /// Picks the known diagnostic headers out of a header list. Names are
    /// compared case-insensitively; unknown headers are ignored.
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut metadata = Self::default();
        for (name, value) in headers {
            match name.to_ascii_lowercase().as_str() {
                "x-ratelimit-remaining" => metadata.ratelimit_remaining = value.trim().parse().ok(),
                "message" => metadata.message = Some(value.to_string()),
                "x-tracking-id" => metadata.tracking_id = Some(value.to_string()),
                _ => {}
            }
        }
        metadata
    }
}

/// Cash and securities held on an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Positions {
    pub money: Vec<MoneyValue>,
    pub blocked: Vec<MoneyValue>,
    pub securities: Vec<PortfolioSecurity>,
}

impl Positions {
    /// Free cash in `currency` (case-insensitive), zero when the account has none.
    pub fn available(&self, currency: &str) -> core_types::Quotation {
        self.money
            .iter()
            .filter(|m| m.currency.eq_ignore_ascii_case(currency))
            .fold(core_types::Quotation::ZERO, |acc, m| acc + m.amount)
    }
}

/// One valued line of the account portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub instrument_uid: String,
    /// Pieces held; negative for a short.
    pub quantity: i64,
    pub average_price: MoneyValue,
    pub current_price: MoneyValue,
}

/// The account valued at current prices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub total_amount: Option<MoneyValue>,
    pub positions: Vec<PortfolioPosition>,
}

impl Portfolio {
    /// Unrealized result of every position priced in `currency`. `None` on
    /// overflow.
    pub fn expected_yield(&self, currency: &str) -> Option<core_types::Quotation> {
        self.positions
            .iter()
            .filter(|p| p.current_price.currency.eq_ignore_ascii_case(currency))
            .try_fold(core_types::Quotation::ZERO, |acc, p| {
                let delta = p.current_price.amount.checked_sub(p.average_price.amount)?;
                acc.checked_add(delta.checked_mul_int(p.quantity)?)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Quotation;

    #[test]
    fn test_metadata_from_headers() {
        let metadata = ResponseMetadata::from_headers([
            ("X-RateLimit-Remaining", "42"),
            ("message", "instrument not found"),
            ("content-type", "application/grpc"),
        ]);
        assert_eq!(metadata.ratelimit_remaining, Some(42));
        assert_eq!(metadata.message.as_deref(), Some("instrument not found"));
        assert_eq!(metadata.tracking_id, None);
    }

    #[test]
    fn test_available_cash_sums_matching_currency() {
        let positions = Positions {
            money: vec![
                MoneyValue {
                    currency: "rub".to_string(),
                    amount: Quotation::new(1000, 500_000_000).unwrap(),
                },
                MoneyValue {
                    currency: "usd".to_string(),
                    amount: Quotation::from_units(7),
                },
            ],
            ..Default::default()
        };
        assert_eq!(positions.available("RUB"), Quotation::new(1000, 500_000_000).unwrap());
        assert_eq!(positions.available("eur"), Quotation::ZERO);
    }

    #[test]
    fn test_expected_yield_counts_shorts_negative() {
        let money = |units: i64| MoneyValue {
            currency: "rub".to_string(),
            amount: Quotation::from_units(units),
        };
        let portfolio = Portfolio {
            total_amount: None,
            positions: vec![
                PortfolioPosition {
                    instrument_uid: "SBER".to_string(),
                    quantity: 10,
                    average_price: money(100),
                    current_price: money(103),
                },
                PortfolioPosition {
                    instrument_uid: "GAZP".to_string(),
                    quantity: -5,
                    average_price: money(150),
                    current_price: money(152),
                },
            ],
        };
        assert_eq!(portfolio.expected_yield("RUB"), Some(Quotation::from_units(20)));
        assert_eq!(portfolio.expected_yield("usd"), Some(Quotation::ZERO));
    }
}
