//! Greedy purchase/upgrade policy.
//!
//! Every cycle the candidate steps are:
//!
//! * buy one new node at the base size, while below the node ceiling;
//! * double the RAM of one purchased node, while below the maximum size.
//!
//! The cheapest candidate is taken first and only when
//! `money - reserve > cost`.  There is no saving up for a larger step later.

use std::collections::BTreeSet;

use crate::config::AutoscaleConfig;
use crate::node::Ram;

/// What the host charges, and how many nodes it allows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Market {
    pub price_per_gb: f64,
    pub node_limit: u32,
}

impl Market {
    pub fn price(&self, ram: Ram) -> f64 {
        self.price_per_gb * ram.as_gb()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Purchase { node: String, ram: Ram },
    Upgrade { node: String, from: Ram, to: Ram },
}

impl Step {
    pub fn node(&self) -> &str {
        match self {
            Step::Purchase { node, .. } | Step::Upgrade { node, .. } => node,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub step: Step,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct AutoscalePolicy {
    cfg: AutoscaleConfig,
}

impl AutoscalePolicy {
    pub fn new(cfg: AutoscaleConfig) -> Self {
        Self { cfg }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    /// Ceiling on purchased nodes: the host's, or the configured one if lower.
    pub fn node_limit(&self, market: &Market) -> u32 {
        self.cfg
            .node_limit
            .map_or(market.node_limit, |l| l.min(market.node_limit))
    }

    /// `money - reserve > cost`.
    pub fn affordable(&self, money: f64, cost: f64) -> bool {
        money - self.cfg.reserve > cost
    }

    /// Every possible step, cheapest first.  Ties go to purchases, then to
    /// node name.
    pub fn candidates(&self, owned: &[(String, Ram)], market: &Market) -> Vec<Candidate> {
        let mut out = Vec::new();

        if (owned.len() as u64) < u64::from(self.node_limit(market)) {
            let node = self.next_name(owned);
            out.push(Candidate {
                cost: market.price(self.cfg.base_ram),
                step: Step::Purchase {
                    node,
                    ram: self.cfg.base_ram,
                },
            });
        }

        for (name, ram) in owned {
            if *ram >= self.cfg.max_ram {
                continue;
            }
            let to = ram.times(2).min(self.cfg.max_ram);
            out.push(Candidate {
                cost: market.price(to) - market.price(*ram),
                step: Step::Upgrade {
                    node: name.clone(),
                    from: *ram,
                    to,
                },
            });
        }

        out.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then_with(|| rank(&a.step).cmp(&rank(&b.step)))
                .then_with(|| a.step.node().cmp(b.step.node()))
        });
        out
    }

    /// The step to take with `money` available, if any.
    pub fn next_step(&self, money: f64, owned: &[(String, Ram)], market: &Market) -> Option<Candidate> {
        if !self.cfg.enabled {
            return None;
        }
        self.candidates(owned, market)
            .into_iter()
            .next()
            .filter(|c| self.affordable(money, c.cost))
    }

    /// First `{prefix}{n}` not already taken.
    fn next_name(&self, owned: &[(String, Ram)]) -> String {
        let taken: BTreeSet<&str> = owned.iter().map(|(n, _)| n.as_str()).collect();
        (0..)
            .map(|i| format!("{}{}", self.cfg.node_prefix, i))
            .find(|n| !taken.contains(n.as_str()))
            .unwrap_or_else(|| self.cfg.node_prefix.clone())
    }
}

fn rank(step: &Step) -> u8 {
    match step {
        Step::Purchase { .. } => 0,
        Step::Upgrade { .. } => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gb(n: u64) -> Ram {
        Ram::from_whole_gb(n)
    }

    fn policy(reserve: f64) -> AutoscalePolicy {
        AutoscalePolicy::new(AutoscaleConfig {
            enabled: true,
            reserve,
            node_prefix: "bought-".into(),
            base_ram: gb(2),
            max_ram: gb(8),
            node_limit: None,
        })
    }

    const MARKET: Market = Market {
        price_per_gb: 55_000.0,
        node_limit: 2,
    };

    #[test]
    fn buys_only_strictly_above_reserve_plus_cost() {
        let p = policy(1_000.0);
        let cost = 110_000.0;

        // funds == reserve + cost - 1
        assert_eq!(p.next_step(1_000.0 + cost - 1.0, &[], &MARKET), None);
        // funds == reserve + cost
        assert_eq!(p.next_step(1_000.0 + cost, &[], &MARKET), None);

        let c = p.next_step(1_000.0 + cost + 1.0, &[], &MARKET).unwrap();
        assert_eq!(c.cost, cost);
        assert_eq!(
            c.step,
            Step::Purchase {
                node: "bought-0".into(),
                ram: gb(2)
            }
        );
    }

    #[test]
    fn cheapest_step_first() {
        let p = policy(0.0);
        let owned = vec![("bought-0".to_string(), gb(4)), ("bought-1".to_string(), gb(2))];
        // At the ceiling: no purchase.  Upgrading the 2GB node is cheaper.
        let c = p.next_step(1e12, &owned, &MARKET).unwrap();
        assert_eq!(
            c.step,
            Step::Upgrade {
                node: "bought-1".into(),
                from: gb(2),
                to: gb(4)
            }
        );
        assert_eq!(c.cost, 110_000.0);
    }

    #[test]
    fn purchase_wins_a_tie_with_an_upgrade() {
        let p = policy(0.0);
        let owned = vec![("bought-0".to_string(), gb(2))];
        let all = p.candidates(&owned, &MARKET);
        assert_eq!(all.len(), 2);
        assert!(matches!(all[0].step, Step::Purchase { ref node, .. } if node == "bought-1"));
    }

    #[test]
    fn maxed_nodes_are_not_upgraded() {
        let p = policy(0.0);
        let owned = vec![("bought-0".to_string(), gb(8)), ("bought-1".to_string(), gb(8))];
        assert!(p.candidates(&owned, &MARKET).is_empty());
    }

    #[test]
    fn configured_limit_lowers_the_ceiling() {
        let mut cfg = policy(0.0).cfg;
        cfg.node_limit = Some(1);
        let p = AutoscalePolicy::new(cfg);
        assert_eq!(p.node_limit(&MARKET), 1);
        let owned = vec![("bought-0".to_string(), gb(8))];
        assert!(p.candidates(&owned, &MARKET).is_empty());
    }

    #[test]
    fn names_fill_gaps() {
        let p = policy(0.0);
        let owned = vec![("bought-1".to_string(), gb(8))];
        let all = p.candidates(&owned, &MARKET);
        assert_eq!(all[0].step.node(), "bought-0");
    }

    #[test]
    fn disabled_policy_never_spends() {
        let mut cfg = policy(0.0).cfg;
        cfg.enabled = false;
        assert_eq!(AutoscalePolicy::new(cfg).next_step(1e12, &[], &MARKET), None);
    }
}
