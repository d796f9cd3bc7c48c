//! Evaluation manager.
//!
//! On every tick, walks the policy snapshot and turns each due rule
//! into a `Trigger`. A rule is due once its stat window has elapsed
//! since it last produced a trigger; rules still in cool-down and apps
//! whose circuit breaker refuses requests are suppressed. The whole
//! tick's triggers go out as one batch so a single evaluator sees
//! them together.
//!
//! The per-app breaker map and the per-(app, metric) cool-down map
//! live here; evaluators reach back through `get_breaker` and
//! `set_cool_down_expired` to record scale outcomes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridscale_models::Trigger;

use crate::breaker::CircuitBreaker;
use crate::config::{BreakerConfig, EvaluatorConfig};
use crate::{now_nanos, GetPoliciesFn};

type CoolDownKey = (String, String);

pub struct AppEvaluationManager {
    config: EvaluatorConfig,
    breaker_config: BreakerConfig,
    get_policies: GetPoliciesFn,
    trigger_tx: flume::Sender<Vec<Trigger>>,
    breakers: Mutex<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
    /// Cool-down expiry (unix nanos) per (app id, metric type).
    cool_downs: Mutex<HashMap<CoolDownKey, i64>>,
    /// Last trigger emission (unix nanos) per (app id, metric type).
    last_evaluated: Mutex<HashMap<CoolDownKey, i64>>,
}

impl AppEvaluationManager {
    pub fn new(
        config: EvaluatorConfig,
        breaker_config: BreakerConfig,
        get_policies: GetPoliciesFn,
        trigger_tx: flume::Sender<Vec<Trigger>>,
    ) -> Self {
        Self {
            config,
            breaker_config,
            get_policies,
            trigger_tx,
            breakers: Mutex::new(HashMap::new()),
            cool_downs: Mutex::new(HashMap::new()),
            last_evaluated: Mutex::new(HashMap::new()),
        }
    }

    /// Run the trigger tick loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.evaluation_manager_interval_secs,
            "evaluation manager started"
        );
        let mut tick = tokio::time::interval(self.config.manager_interval());
        loop {
            tokio::select! {
                _ = tick.tick() => self.dispatch_triggers(now_nanos()).await,
                _ = shutdown.changed() => {
                    info!("evaluation manager shutting down");
                    break;
                }
            }
        }
    }

    /// Build and send this tick's trigger batch.
    async fn dispatch_triggers(&self, now: i64) {
        let policies = (self.get_policies)();
        let mut batch = Vec::new();
        let mut emitted: Vec<CoolDownKey> = Vec::new();
        {
            let mut last_evaluated = self.last_evaluated.lock().unwrap();
            for (app_id, policy) in &policies {
                for rule in &policy.scaling_rules {
                    let key = (app_id.clone(), rule.metric_type.clone());
                    // The gate reads the pre-tick stamp, so several rules on
                    // one metric type still share a tick; the stamp lands
                    // after the walk.
                    let window =
                        rule.stat_window(self.config.default_stat_window_secs).as_nanos() as i64;
                    if let Some(&last) = last_evaluated.get(&key) {
                        if now < last + window {
                            debug!(%app_id, metric_type = %rule.metric_type, "stat window not elapsed, rule skipped");
                            continue;
                        }
                    }
                    if self.in_cool_down(app_id, &rule.metric_type, now) {
                        debug!(%app_id, metric_type = %rule.metric_type, "rule in cool-down, skipped");
                        continue;
                    }
                    if !self.get_breaker(app_id).lock().unwrap().allow_request(now) {
                        debug!(%app_id, "breaker refused request, rule skipped");
                        continue;
                    }
                    emitted.push(key);
                    batch.push(Trigger {
                        app_id: app_id.clone(),
                        metric_type: rule.metric_type.clone(),
                        metric_unit: String::new(),
                        breach_duration_secs: rule
                            .breach_duration(self.config.default_breach_duration_secs)
                            .as_secs() as i64,
                        threshold: rule.threshold,
                        operator: rule.operator,
                        cool_down_secs: rule.cool_down(self.config.default_cool_down_secs).as_secs()
                            as i64,
                        adjustment: rule.adjustment.clone(),
                    });
                }
            }
            for key in emitted {
                last_evaluated.insert(key, now);
            }
        }
        if batch.is_empty() {
            return;
        }
        debug!(triggers = batch.len(), "dispatching trigger batch");
        if self.trigger_tx.send_async(batch).await.is_err() {
            warn!("trigger channel closed, batch dropped");
        }
    }

    /// The app's breaker, created closed on first use.
    pub fn get_breaker(&self, app_id: &str) -> Arc<Mutex<CircuitBreaker>> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(app_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(&self.breaker_config))))
            .clone()
    }

    /// Suppress triggers for (app, metric type) until `expires_at`
    /// (unix nanos). Called by evaluators after a successful scale.
    pub fn set_cool_down_expired(&self, app_id: &str, metric_type: &str, expires_at: i64) {
        self.cool_downs
            .lock()
            .unwrap()
            .insert((app_id.to_string(), metric_type.to_string()), expires_at);
    }

    /// Expired entries are removed on the way out.
    pub(crate) fn in_cool_down(&self, app_id: &str, metric_type: &str, now: i64) -> bool {
        let key = (app_id.to_string(), metric_type.to_string());
        let mut cool_downs = self.cool_downs.lock().unwrap();
        match cool_downs.get(&key) {
            Some(&expires_at) if now < expires_at => true,
            Some(_) => {
                cool_downs.remove(&key);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use gridscale_models::{Operator, Policy, ScalingRule};

    const SEC: i64 = 1_000_000_000;

    fn rule(metric_type: &str) -> ScalingRule {
        ScalingRule {
            metric_type: metric_type.to_string(),
            stat_window_secs: 120,
            breach_duration_secs: 120,
            threshold: 30,
            operator: Operator::Ge,
            cool_down_secs: 300,
            adjustment: "+1".to_string(),
        }
    }

    fn manager(
        policies: Vec<(&str, Vec<ScalingRule>)>,
    ) -> (AppEvaluationManager, flume::Receiver<Vec<Trigger>>) {
        let snapshot: HashMap<String, Arc<Policy>> = policies
            .into_iter()
            .map(|(app_id, rules)| {
                (
                    app_id.to_string(),
                    Arc::new(Policy {
                        app_id: app_id.to_string(),
                        instance_min_count: 1,
                        instance_max_count: 5,
                        scaling_rules: rules,
                    }),
                )
            })
            .collect();
        let get_policies: GetPoliciesFn = Arc::new(move || snapshot.clone());
        let (trigger_tx, trigger_rx) = flume::bounded(4);
        let mgr = AppEvaluationManager::new(
            EvaluatorConfig::default(),
            BreakerConfig::default(),
            get_policies,
            trigger_tx,
        );
        (mgr, trigger_rx)
    }

    #[tokio::test]
    async fn whole_tick_forms_one_batch() {
        let (mgr, rx) = manager(vec![
            ("app-1", vec![rule("memoryused"), rule("throughput")]),
            ("app-2", vec![rule("memoryused")]),
        ]);
        mgr.dispatch_triggers(0).await;

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn trigger_carries_resolved_rule_parameters() {
        let mut r = rule("memoryused");
        r.breach_duration_secs = 0; // falls back to the default
        r.cool_down_secs = 0;
        let (mgr, rx) = manager(vec![("app-1", vec![r])]);
        mgr.dispatch_triggers(0).await;

        let batch = rx.try_recv().unwrap();
        let t = &batch[0];
        assert_eq!(t.breach_duration_secs, 120);
        assert_eq!(t.cool_down_secs, 300);
        assert_eq!(t.threshold, 30);
        assert_eq!(t.operator, Operator::Ge);
        assert_eq!(t.metric_unit, "");
    }

    #[tokio::test]
    async fn stat_window_paces_repeat_triggers() {
        let (mgr, rx) = manager(vec![("app-1", vec![rule("memoryused")])]);
        mgr.dispatch_triggers(0).await;
        assert_eq!(rx.try_recv().unwrap().len(), 1);

        // Rule's 120s stat window has not elapsed yet.
        mgr.dispatch_triggers(60 * SEC).await;
        assert!(rx.try_recv().is_err());

        mgr.dispatch_triggers(120 * SEC).await;
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rules_on_one_metric_type_share_a_tick() {
        let mut second = rule("memoryused");
        second.operator = Operator::Le;
        let (mgr, rx) = manager(vec![("app-1", vec![rule("memoryused"), second])]);
        mgr.dispatch_triggers(0).await;
        assert_eq!(rx.try_recv().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cool_down_suppresses_until_expiry() {
        let (mgr, rx) = manager(vec![("app-1", vec![rule("memoryused")])]);
        mgr.set_cool_down_expired("app-1", "memoryused", 100 * SEC);

        mgr.dispatch_triggers(50 * SEC).await;
        assert!(rx.try_recv().is_err());

        mgr.dispatch_triggers(100 * SEC).await;
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cool_down_is_scoped_to_the_metric_type() {
        let (mgr, rx) = manager(vec![("app-1", vec![rule("memoryused"), rule("throughput")])]);
        mgr.set_cool_down_expired("app-1", "memoryused", 100 * SEC);

        mgr.dispatch_triggers(50 * SEC).await;
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].metric_type, "throughput");
    }

    #[tokio::test]
    async fn open_breaker_suppresses_the_app() {
        let (mgr, rx) = manager(vec![
            ("app-1", vec![rule("memoryused")]),
            ("app-2", vec![rule("memoryused")]),
        ]);
        {
            let breaker = mgr.get_breaker("app-1");
            let mut breaker = breaker.lock().unwrap();
            for _ in 0..3 {
                breaker.record_failure(0);
            }
        }

        mgr.dispatch_triggers(SEC).await;
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].app_id, "app-2");
    }

    #[tokio::test]
    async fn empty_tick_sends_no_batch() {
        let (mgr, rx) = manager(vec![]);
        mgr.dispatch_triggers(0).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn get_breaker_returns_the_same_instance_per_app() {
        let (mgr, _rx) = manager(vec![]);
        let a = mgr.get_breaker("app-1");
        let b = mgr.get_breaker("app-1");
        assert!(Arc::ptr_eq(&a, &b));
        let c = mgr.get_breaker("app-2");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
