/// Crowns and pennies - construction, conversion, purchase settlement, formatting and parsing
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::MarketError;

/// Twelve pennies make one crown.
pub const PENNIES_PER_CROWN: u64 = 12;

/// An amount of money. `pennies` is always below [`PENNIES_PER_CROWN`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StoredMoney")]
pub struct Money {
    crowns: u64,
    pennies: u8,
}

/// Wire shape of [`Money`]; decoding goes through [`Money::new`].
#[derive(Deserialize)]
struct StoredMoney {
    crowns: u64,
    pennies: u8,
}

impl TryFrom<StoredMoney> for Money {
    type Error = MarketError;

    fn try_from(raw: StoredMoney) -> Result<Self, Self::Error> {
        Money::new(raw.crowns, raw.pennies as u64)
    }
}

impl Money {
    pub const ZERO: Money = Money {
        crowns: 0,
        pennies: 0,
    };

    /// Build an amount, rejecting a pennies component of 12 or more.
    pub fn new(crowns: u64, pennies: u64) -> Result<Self, MarketError> {
        if pennies >= PENNIES_PER_CROWN {
            return Err(MarketError::InvalidCurrency(format!(
                "{} pennies is not below {}",
                pennies, PENNIES_PER_CROWN
            )));
        }
        Ok(Self {
            crowns,
            pennies: pennies as u8,
        })
    }

    /// Build an amount from raw parts, carrying excess pennies into crowns.
    pub fn normalized(crowns: u64, pennies: u64) -> Self {
        Self::from_pennies(
            crowns
                .saturating_mul(PENNIES_PER_CROWN)
                .saturating_add(pennies),
        )
    }

    /// Re-split a flat penny count into crowns and pennies.
    pub fn from_pennies(total: u64) -> Self {
        Self {
            crowns: total / PENNIES_PER_CROWN,
            pennies: (total % PENNIES_PER_CROWN) as u8,
        }
    }

    pub fn crowns(&self) -> u64 {
        self.crowns
    }

    pub fn pennies(&self) -> u8 {
        self.pennies
    }

    /// Flatten to pennies (`crowns * 12 + pennies`).
    pub fn total_pennies(&self) -> u64 {
        self.crowns
            .saturating_mul(PENNIES_PER_CROWN)
            .saturating_add(self.pennies as u64)
    }

    pub fn is_zero(&self) -> bool {
        self.crowns == 0 && self.pennies == 0
    }

    pub fn can_afford(&self, price: &Money) -> bool {
        self.total_pennies() >= price.total_pennies()
    }

    pub fn add(&self, other: &Money) -> Money {
        Money::from_pennies(self.total_pennies().saturating_add(other.total_pennies()))
    }

    /// Long form used on pages: "3 Crowns, 10 Pennies".
    pub fn long_form(&self) -> String {
        format!("{} Crowns, {} Pennies", self.crowns, self.pennies)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}c {}p", self.crowns, self.pennies)
    }
}

/// Settle a purchase: the buyer's balance after paying `price`.
///
/// Both amounts are flattened to pennies; if the balance falls short the purchase is
/// rejected and the caller's balance is left untouched.
pub fn settle_purchase(balance: &Money, price: &Money) -> Result<Money, MarketError> {
    let have = balance.total_pennies();
    let need = price.total_pennies();
    if have < need {
        return Err(MarketError::InsufficientFunds);
    }
    Ok(Money::from_pennies(have - need))
}

/// Parse a price typed at the console.
/// Examples: "2c 4p", "2c", "28p", "2 4" (crowns then pennies), "2"
pub fn parse_money(input: &str) -> Result<Money, MarketError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(MarketError::InvalidCurrency("empty amount".to_string()));
    }

    let parts: Vec<&str> = input.split_whitespace().collect();
    let mut crowns: Option<u64> = None;
    let mut pennies: Option<u64> = None;
    let mut bare: Vec<u64> = Vec::new();

    for part in parts {
        let lower = part.to_ascii_lowercase();
        if let Some(num) = lower.strip_suffix('c') {
            if crowns.is_some() {
                return Err(MarketError::InvalidCurrency("crowns given twice".to_string()));
            }
            crowns = Some(parse_part(num)?);
        } else if let Some(num) = lower.strip_suffix('p') {
            if pennies.is_some() {
                return Err(MarketError::InvalidCurrency("pennies given twice".to_string()));
            }
            pennies = Some(parse_part(num)?);
        } else {
            bare.push(parse_part(&lower)?);
        }
    }

    match (crowns, pennies, bare.as_slice()) {
        (None, None, [c]) => Ok(Money::normalized(*c, 0)),
        (None, None, [c, p]) => Money::new(*c, *p),
        (c, p, []) => {
            let c = c.unwrap_or(0);
            let p = p.unwrap_or(0);
            if c == 0 {
                // "28p" alone is a flat penny count
                Ok(Money::from_pennies(p))
            } else {
                Money::new(c, p)
            }
        }
        _ => Err(MarketError::InvalidCurrency(format!(
            "cannot read '{}' as an amount",
            input
        ))),
    }
}

fn parse_part(text: &str) -> Result<u64, MarketError> {
    text.trim()
        .parse::<u64>()
        .map_err(|_| MarketError::InvalidCurrency(format!("'{}' is not a whole number", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worked_purchase_example() {
        let balance = Money::new(3, 10).unwrap();
        let price = Money::new(2, 4).unwrap();
        assert_eq!(balance.total_pennies(), 46);
        assert_eq!(price.total_pennies(), 28);

        let after = settle_purchase(&balance, &price).unwrap();
        assert_eq!(after.total_pennies(), 18);
        assert_eq!((after.crowns(), after.pennies()), (1, 6));
    }

    #[test]
    fn purchase_over_balance_is_rejected() {
        let balance = Money::new(1, 0).unwrap();
        let price = Money::new(1, 1).unwrap();
        assert!(matches!(
            settle_purchase(&balance, &price),
            Err(MarketError::InsufficientFunds)
        ));
        assert_eq!(balance, Money::new(1, 0).unwrap());
    }

    #[test]
    fn settlement_preserves_totals_and_penny_range() {
        for bc in 0..6u64 {
            for bp in 0..12u64 {
                for pc in 0..6u64 {
                    for pp in 0..12u64 {
                        let balance = Money::new(bc, bp).unwrap();
                        let price = Money::new(pc, pp).unwrap();
                        match settle_purchase(&balance, &price) {
                            Ok(after) => {
                                assert_eq!(
                                    after.total_pennies(),
                                    balance.total_pennies() - price.total_pennies()
                                );
                                assert!(after.pennies() < 12);
                            }
                            Err(_) => assert!(balance.total_pennies() < price.total_pennies()),
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn new_rejects_twelve_pennies() {
        assert!(Money::new(0, 12).is_err());
        assert!(Money::new(5, 11).is_ok());
    }

    #[test]
    fn normalized_carries_pennies() {
        let m = Money::normalized(2, 15);
        assert_eq!((m.crowns(), m.pennies()), (3, 3));
        assert_eq!(Money::normalized(0, 10).add(&Money::normalized(0, 10)), Money::new(1, 8).unwrap());
    }

    #[test]
    fn formatting() {
        let m = Money::new(4, 6).unwrap();
        assert_eq!(m.to_string(), "4c 6p");
        assert_eq!(m.long_form(), "4 Crowns, 6 Pennies");
    }

    #[test]
    fn parsing_console_amounts() {
        assert_eq!(parse_money("2c 4p").unwrap(), Money::new(2, 4).unwrap());
        assert_eq!(parse_money("2C").unwrap(), Money::new(2, 0).unwrap());
        assert_eq!(parse_money("28p").unwrap(), Money::new(2, 4).unwrap());
        assert_eq!(parse_money("2 4").unwrap(), Money::new(2, 4).unwrap());
        assert_eq!(parse_money("7").unwrap(), Money::new(7, 0).unwrap());
        assert!(parse_money("2 12").is_err());
        assert!(parse_money("1c 12p").is_err());
        assert!(parse_money("gold").is_err());
        assert!(parse_money("").is_err());
    }

    #[test]
    fn stored_amounts_are_checked_on_decode() {
        let good = bincode::serialize(&Money::new(3, 10).unwrap()).unwrap();
        assert_eq!(bincode::deserialize::<Money>(&good).unwrap(), Money::new(3, 10).unwrap());

        let bad = bincode::serialize(&(7u64, 15u8)).unwrap();
        let err = bincode::deserialize::<Money>(&bad).unwrap_err();
        assert!(err.to_string().contains("15 pennies"), "{}", err);
    }
}
