//! In-memory alert rule store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::{AlertRepository, AlertStoreError};
use crate::domain::alert::{AlertId, AlertRule, OwnerId};
use crate::domain::quote::Ticker;

#[derive(Debug, Default)]
struct StoreState {
    rules: HashMap<AlertId, AlertRule>,
    /// Active rule ids per ticker. Inactive rules leave the index.
    active_by_ticker: HashMap<Ticker, HashSet<AlertId>>,
}

impl StoreState {
    fn index(&mut self, rule: &AlertRule) {
        if rule.active {
            self.active_by_ticker
                .entry(rule.ticker.clone())
                .or_default()
                .insert(rule.id);
        }
    }

    fn unindex(&mut self, ticker: &Ticker, id: AlertId) {
        if let Some(ids) = self.active_by_ticker.get_mut(ticker) {
            ids.remove(&id);
            if ids.is_empty() {
                self.active_by_ticker.remove(ticker);
            }
        }
    }
}

/// In-memory implementation of [`AlertRepository`].
///
/// Rules live for the process lifetime. All state sits behind one lock, so
/// [`AlertRepository::try_trigger`] is a true compare-and-swap.
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    state: RwLock<StoreState>,
}

impl InMemoryAlertStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rules, active or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().rules.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().rules.is_empty()
    }

    /// Number of rules still waiting to fire.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state
            .read()
            .active_by_ticker
            .values()
            .map(HashSet::len)
            .sum()
    }

    /// Add a rule synchronously (for test setup and seeding).
    pub fn insert_rule(&self, rule: AlertRule) {
        let mut state = self.state.write();
        if let Some(previous) = state.rules.get(&rule.id).map(|r| r.ticker.clone()) {
            state.unindex(&previous, rule.id);
        }
        state.index(&rule);
        state.rules.insert(rule.id, rule);
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertStore {
    async fn insert(&self, rule: AlertRule) -> Result<(), AlertStoreError> {
        self.insert_rule(rule);
        Ok(())
    }

    async fn active_for_ticker(&self, ticker: &Ticker) -> Result<Vec<AlertRule>, AlertStoreError> {
        let state = self.state.read();
        Ok(state
            .active_by_ticker
            .get(ticker)
            .into_iter()
            .flatten()
            .filter_map(|id| state.rules.get(id))
            .filter(|rule| rule.active)
            .cloned()
            .collect())
    }

    async fn try_trigger(
        &self,
        id: AlertId,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<AlertRule>, AlertStoreError> {
        let mut state = self.state.write();
        let Some(rule) = state.rules.get_mut(&id) else {
            return Ok(None);
        };
        if !rule.trigger(price, at) {
            return Ok(None);
        }
        let fired = rule.clone();
        state.unindex(&fired.ticker, id);
        Ok(Some(fired))
    }

    async fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<AlertRule>, AlertStoreError> {
        Ok(self
            .state
            .read()
            .rules
            .values()
            .filter(|rule| &rule.owner_id == owner)
            .cloned()
            .collect())
    }

    async fn remove(&self, owner: &OwnerId, id: AlertId) -> Result<(), AlertStoreError> {
        let mut state = self.state.write();
        let ticker = match state.rules.get(&id) {
            Some(rule) if &rule.owner_id == owner => rule.ticker.clone(),
            _ => return Err(AlertStoreError::NotFound(id)),
        };
        state.rules.remove(&id);
        state.unindex(&ticker, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::alert::AlertCondition;

    fn rule(owner: &str, ticker: &str, target: Decimal) -> AlertRule {
        AlertRule::new(
            OwnerId::new(owner),
            Ticker::parse(ticker).unwrap(),
            target,
            AlertCondition::Above,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn active_for_ticker_is_scoped() {
        let store = InMemoryAlertStore::new();
        store.insert(rule("a", "TSLA", dec!(100))).await.unwrap();
        store.insert(rule("b", "TSLA", dec!(200))).await.unwrap();
        store.insert(rule("a", "AAPL", dec!(100))).await.unwrap();

        let tsla = Ticker::parse("TSLA").unwrap();
        let found = store.active_for_ticker(&tsla).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.ticker == tsla));
    }

    #[tokio::test]
    async fn try_trigger_wins_once() {
        let store = InMemoryAlertStore::new();
        let r = rule("a", "TSLA", dec!(100));
        let id = r.id;
        store.insert_rule(r);

        let now = Utc::now();
        let first = store.try_trigger(id, dec!(101), now).await.unwrap();
        let second = store.try_trigger(id, dec!(102), now).await.unwrap();

        let fired = first.unwrap();
        assert!(!fired.active);
        assert_eq!(fired.triggered_price, Some(dec!(101)));
        assert!(second.is_none());
        assert_eq!(store.active_count(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn triggered_rules_leave_the_ticker_index() {
        let store = InMemoryAlertStore::new();
        let r = rule("a", "TSLA", dec!(100));
        let id = r.id;
        store.insert_rule(r);

        store.try_trigger(id, dec!(101), Utc::now()).await.unwrap();

        let tsla = Ticker::parse("TSLA").unwrap();
        assert!(store.active_for_ticker(&tsla).await.unwrap().is_empty());
        let owned = store.list_for_owner(&OwnerId::new("a")).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert!(!owned[0].active);
    }

    #[tokio::test]
    async fn try_trigger_unknown_rule_is_none() {
        let store = InMemoryAlertStore::new();
        let result = store
            .try_trigger(AlertId::new(), dec!(1), Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn concurrent_triggers_have_one_winner() {
        let store = Arc::new(InMemoryAlertStore::new());
        let r = rule("a", "TSLA", dec!(100));
        let id = r.id;
        store.insert_rule(r);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .try_trigger(id, Decimal::from(150 + i), Utc::now())
                        .await
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn remove_checks_owner() {
        let store = InMemoryAlertStore::new();
        let r = rule("a", "TSLA", dec!(100));
        let id = r.id;
        store.insert_rule(r);

        assert!(matches!(
            store.remove(&OwnerId::new("b"), id).await,
            Err(AlertStoreError::NotFound(_))
        ));
        assert_eq!(store.len(), 1);

        store.remove(&OwnerId::new("a"), id).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.active_count(), 0);
    }
}
