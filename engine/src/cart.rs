//! Cart - the in-memory line list.
//!
//! The Cart holds the lines a shopper has selected, enforces the one line per
//! key invariant and derives the count and total aggregates.

use crate::{error::Result, CartLine, Error, LineInput, LineKey, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result of adding to the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    /// The key that was added to
    pub key: LineKey,
    /// Quantity of the line after the add
    pub quantity: Quantity,
    /// Whether a new line was appended
    pub created: bool,
}

/// Derived cart aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    /// Sum of quantities
    pub count: u64,
    /// Sum of quantity * unit price
    pub total: Decimal,
}

/// Ordered list of cart lines, unique by [`LineKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// Create an empty cart.
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Build a cart from lines, keeping the last line seen for each key.
    pub fn from_lines(lines: impl IntoIterator<Item = CartLine>) -> Result<Self> {
        let mut cart = Self::new();
        cart.replace_all(lines)?;
        Ok(cart)
    }

    /// All lines in insertion order.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Number of distinct lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Get the line for a key.
    pub fn get(&self, key: &LineKey) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.matches(key))
    }

    fn position(&self, key: &LineKey) -> Option<usize> {
        self.lines.iter().position(|l| l.matches(key))
    }

    /// Quantity the line for `input` would hold after adding it.
    ///
    /// Used by account-mode adds, which write the new total remotely before
    /// touching the in-memory cart.
    pub fn planned_quantity(&self, input: &LineInput) -> Result<Quantity> {
        input.validate()?;
        let current = self.get(&input.key()).map_or(0, |l| l.quantity);
        current
            .checked_add(input.quantity)
            .ok_or(Error::InvalidQuantity(i64::from(current) + i64::from(input.quantity)))
    }

    /// Add units of a product, merging into an existing line for the same key.
    pub fn add(&mut self, input: LineInput) -> Result<AddOutcome> {
        let quantity = self.planned_quantity(&input)?;
        let key = input.key();

        match self.position(&key) {
            Some(idx) => {
                if let Some(line) = self.lines.get_mut(idx) {
                    line.quantity = quantity;
                }
                Ok(AddOutcome {
                    key,
                    quantity,
                    created: false,
                })
            }
            None => {
                self.lines.push(input.into_line(quantity));
                Ok(AddOutcome {
                    key,
                    quantity,
                    created: true,
                })
            }
        }
    }

    /// Set the quantity of an existing line.
    ///
    /// A quantity below one removes the line. Returns the line after the
    /// change, or `None` if the line is absent (or was removed).
    pub fn set_quantity(&mut self, key: &LineKey, quantity: i64) -> Option<&CartLine> {
        if quantity < 1 {
            self.remove(key);
            return None;
        }
        let quantity = Quantity::try_from(quantity).unwrap_or(Quantity::MAX);
        let idx = self.position(key)?;
        let line = self.lines.get_mut(idx)?;
        line.quantity = quantity;
        Some(line)
    }

    /// Remove the line for a key. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &LineKey) -> Option<CartLine> {
        let idx = self.position(key)?;
        Some(self.lines.remove(idx))
    }

    /// Remove every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Replace the contents wholesale, normalizing and deduplicating by key.
    pub fn replace_all(&mut self, lines: impl IntoIterator<Item = CartLine>) -> Result<()> {
        let lines = lines
            .into_iter()
            .map(CartLine::normalized)
            .collect::<Result<Vec<_>>>()?;
        self.set_deduped(lines);
        Ok(())
    }

    /// Like [`replace_all`](Self::replace_all), but lines that fail
    /// validation are dropped instead of failing the whole replace.
    ///
    /// Returns the errors of the dropped lines.
    pub fn replace_valid(&mut self, lines: impl IntoIterator<Item = CartLine>) -> Vec<Error> {
        let mut rejected = Vec::new();
        let valid = lines
            .into_iter()
            .filter_map(|line| match line.normalized() {
                Ok(line) => Some(line),
                Err(e) => {
                    rejected.push(e);
                    None
                }
            })
            .collect();
        self.set_deduped(valid);
        rejected
    }

    /// Store normalized lines, keeping the last one seen for each key.
    fn set_deduped(&mut self, lines: Vec<CartLine>) {
        let mut next: Vec<CartLine> = Vec::with_capacity(lines.len());
        for line in lines {
            let key = line.key();
            match next.iter_mut().find(|l| l.matches(&key)) {
                Some(existing) => *existing = line,
                None => next.push(line),
            }
        }
        self.lines = next;
    }

    /// Sum of quantities.
    pub fn count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }

    /// Sum of quantity * unit price.
    pub fn total(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Both aggregates at once.
    pub fn totals(&self) -> Totals {
        Totals {
            count: self.count(),
            total: self.total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(id: &str, price: i64) -> LineInput {
        LineInput::new(id, Decimal::new(price, 0)).with_name(format!("Bag {id}"))
    }

    #[test]
    fn add_new_line() {
        let mut cart = Cart::new();
        let outcome = cart.add(bag("p1", 100_000)).unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.quantity, 1);
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.lines()[0].display_name, "Bag p1");
    }

    #[test]
    fn add_merges_same_key() {
        let mut cart = Cart::new();
        cart.add(bag("p1", 100_000).with_variant("red")).unwrap();
        let outcome = cart
            .add(bag("p1", 100_000).with_variant("red").with_quantity(4))
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.quantity, 5);
        assert_eq!(cart.len(), 1);
    }

    #[test]
    fn different_variants_are_different_lines() {
        let mut cart = Cart::new();
        cart.add(bag("p1", 100_000).with_variant("red")).unwrap();
        cart.add(bag("p1", 100_000).with_variant("black")).unwrap();
        cart.add(bag("p1", 100_000)).unwrap();
        cart.add(bag("p1", 100_000).with_variant("")).unwrap();

        assert_eq!(cart.len(), 3);
        assert_eq!(cart.get(&LineKey::new("p1", None)).unwrap().quantity, 2);
    }

    #[test]
    fn add_rejects_invalid_input() {
        let mut cart = Cart::new();
        assert_eq!(cart.add(bag("", 1)), Err(Error::EmptyProductId));
        assert_eq!(
            cart.add(bag("p1", 1).with_quantity(0)),
            Err(Error::InvalidQuantity(0))
        );
        assert!(cart.is_empty());
    }

    #[test]
    fn planned_quantity_does_not_mutate() {
        let mut cart = Cart::new();
        cart.add(bag("p1", 10).with_quantity(2)).unwrap();

        let planned = cart.planned_quantity(&bag("p1", 10).with_quantity(3)).unwrap();
        assert_eq!(planned, 5);
        assert_eq!(cart.count(), 2);
    }

    #[test]
    fn set_quantity_below_one_removes() {
        let mut cart = Cart::new();
        cart.add(bag("p1", 10)).unwrap();
        cart.add(bag("p2", 10)).unwrap();

        assert!(cart.set_quantity(&LineKey::new("p1", None), 0).is_none());
        assert!(cart.set_quantity(&LineKey::new("p2", None), -1).is_none());
        assert!(cart.is_empty());
    }

    #[test]
    fn set_quantity_on_missing_line() {
        let mut cart = Cart::new();
        assert!(cart.set_quantity(&LineKey::new("nope", None), 3).is_none());
        assert!(cart.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut cart = Cart::new();
        cart.add(bag("p1", 10)).unwrap();
        cart.add(bag("p2", 10)).unwrap();

        let key = LineKey::new("p1", None);
        assert!(cart.remove(&key).is_some());
        let after_first = cart.clone();
        assert!(cart.remove(&key).is_none());
        assert_eq!(cart, after_first);
    }

    #[test]
    fn totals_example() {
        let mut cart = Cart::new();
        cart.add(bag("p1", 100_000).with_quantity(2)).unwrap();
        cart.add(bag("p2", 250_000)).unwrap();

        let totals = cart.totals();
        assert_eq!(totals.count, 3);
        assert_eq!(totals.total, Decimal::new(450_000, 0));
    }

    #[test]
    fn replace_all_dedupes_last_wins() {
        let mut cart = Cart::new();
        let first = bag("p1", 10).with_variant("red").into_line(1);
        let second = bag("p1", 10).with_variant("red").into_line(7);
        let mut plain = bag("p2", 10).into_line(1);
        plain.variant = Some(String::new());

        cart.replace_all(vec![first, plain, second]).unwrap();

        assert_eq!(cart.len(), 2);
        assert_eq!(cart.lines()[0].quantity, 7);
        assert_eq!(cart.lines()[1].variant, None);
    }

    #[test]
    fn replace_all_rejects_zero_quantity() {
        let mut cart = Cart::new();
        cart.add(bag("p1", 10)).unwrap();
        let bad = bag("p2", 10).into_line(0);

        assert_eq!(cart.replace_all(vec![bad]), Err(Error::InvalidQuantity(0)));
        assert_eq!(cart.len(), 1); // untouched on error
    }

    #[test]
    fn replace_valid_drops_bad_lines() {
        let mut cart = Cart::new();
        let good = bag("p1", 10).into_line(2);
        let mut negative = bag("p2", 10).into_line(1);
        negative.unit_price = Decimal::new(-5, 0);

        let rejected = cart.replace_valid(vec![good, negative]);

        assert_eq!(rejected, vec![Error::NegativePrice("p2".into())]);
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.count(), 2);
    }
}
