use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;

use agora_core::connector::order_provider;
use agora_core::sync::{read, write};
use agora_core::{
    AgoraError, CancelAllScope, CancelOutcome, CancelRequest, Capability, Dispatcher, Features,
    OrderEvent, OrderEventKind, OrderFilter, OrderId, OrderPolicy, OrderRecord, OrderRequest,
    OrderStatus, Pipe, SubsystemName, TopicId, VenueOrder,
};

use crate::registry::ExchangeRegistry;
use crate::retry::{RetrySchedule, with_retry};
use crate::supervisor::{Lifecycle, Subsystem};

/// Order event topic shared by the manager and its listeners.
#[derive(Clone, Debug)]
pub struct OrderEventFeed {
    bus: Dispatcher<OrderEvent>,
    topic: TopicId,
}

impl OrderEventFeed {
    /// Register the topic on `bus`.
    #[must_use]
    pub fn new(bus: Dispatcher<OrderEvent>) -> Self {
        let topic = bus.register_topic();
        Self { bus, topic }
    }

    /// Topic id.
    #[must_use]
    pub const fn topic(&self) -> TopicId {
        self.topic
    }

    /// Subscribe to every order event.
    pub fn subscribe(&self) -> Result<Pipe<OrderEvent>, AgoraError> {
        self.bus.subscribe(self.topic)
    }

    async fn publish(&self, kind: OrderEventKind, order: OrderRecord) {
        if let Err(_e) = self.bus.publish(self.topic, OrderEvent { kind, order }).await {
            #[cfg(feature = "tracing")]
            tracing::trace!(error = %_e, "order event not published");
        }
    }
}

/// Ids returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    /// Internal id.
    pub order_id: OrderId,
    /// Venue order id.
    pub venue_order_id: String,
    /// Stored status, `New` or `Filled`.
    pub status: OrderStatus,
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Venue orders not known locally.
    pub added: usize,
    /// Known orders whose fill or status moved.
    pub updated: usize,
    /// Previously open orders the venue no longer reports.
    pub cancelled: usize,
}

fn venue_key(venue: &str) -> String {
    venue.to_lowercase()
}

// Copy the venue's view onto a local record. Terminal records and backward
// status moves are left alone.
fn apply_venue_state(rec: &mut OrderRecord, vo: &VenueOrder) -> Result<bool, AgoraError> {
    if rec.status.is_terminal() {
        return Ok(false);
    }
    let mut changed = false;
    if rec.executed != vo.executed || rec.remaining != vo.remaining {
        rec.set_fill(vo.executed, vo.remaining)?;
        changed = true;
    }
    if rec.status.can_transition_to(vo.status) {
        changed |= rec.transition(vo.status)?;
    }
    Ok(changed)
}

/// `orders` subsystem: per-venue order store, policy checks and adapter calls.
///
/// The store lock is never held across an adapter call.
pub struct OrderManager {
    lifecycle: Lifecycle,
    policy: OrderPolicy,
    exchanges: ExchangeRegistry,
    store: RwLock<HashMap<String, Vec<OrderRecord>>>,
    events: OrderEventFeed,
    schedule: RetrySchedule,
}

impl OrderManager {
    /// Manager over `exchanges`, publishing on `events`.
    #[must_use]
    pub fn new(policy: OrderPolicy, exchanges: ExchangeRegistry, events: OrderEventFeed) -> Self {
        Self {
            lifecycle: Lifecycle::new(SubsystemName::Orders),
            policy,
            exchanges,
            store: RwLock::new(HashMap::new()),
            events,
            schedule: RetrySchedule::ORDERS,
        }
    }

    /// Replace the retry schedule.
    #[must_use]
    pub const fn with_retry_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Policy in force.
    #[must_use]
    pub const fn policy(&self) -> &OrderPolicy {
        &self.policy
    }

    /// Order event feed.
    #[must_use]
    pub fn event_feed(&self) -> OrderEventFeed {
        self.events.clone()
    }

    /// Subscribe to order events.
    pub fn subscribe_events(&self) -> Result<Pipe<OrderEvent>, AgoraError> {
        self.events.subscribe()
    }

    /// Reject `req` if any enabled policy rule is broken.
    pub fn check_policy(&self, venue: &str, req: &OrderRequest) -> Result<(), AgoraError> {
        if req.amount <= Decimal::ZERO {
            return Err(AgoraError::InvalidArg("order amount must be positive".into()));
        }
        if req.order_type.is_limit() && req.price <= Decimal::ZERO {
            return Err(AgoraError::InvalidArg("limit price must be positive".into()));
        }
        let p = &self.policy;
        if !p.allowed_venues.is_empty()
            && !p.allowed_venues.iter().any(|v| v.eq_ignore_ascii_case(venue))
        {
            return Err(AgoraError::PolicyViolation(format!("venue {venue} is not allowed")));
        }
        if p.enforce_limit_only && !req.order_type.is_limit() {
            return Err(AgoraError::PolicyViolation(format!(
                "{} orders rejected: limit orders only",
                req.order_type.as_str()
            )));
        }
        if !p.allow_market_orders && req.order_type.is_market() {
            return Err(AgoraError::PolicyViolation("market orders are disabled".into()));
        }
        if let Some(max) = p.per_order_max_amount
            && req.amount > max
        {
            return Err(AgoraError::PolicyViolation(format!(
                "amount {} exceeds per-order maximum {max}",
                req.amount
            )));
        }
        if !p.allowed_instruments.is_empty() && !p.allowed_instruments.contains(&req.pair) {
            return Err(AgoraError::PolicyViolation(format!(
                "instrument {} is not allowed",
                req.pair
            )));
        }
        Ok(())
    }

    /// Validate, forward to the venue and store the accepted order.
    ///
    /// Transient venue errors are retried within the submission budget; the
    /// last error is returned once it is spent.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::orders::submit",
            skip(self, req),
            fields(pair = %req.pair, side = ?req.side, amount = %req.amount),
        )
    )]
    pub async fn submit(&self, venue: &str, req: OrderRequest) -> Result<SubmitResult, AgoraError> {
        self.lifecycle.ensure_running()?;
        let connector = self.exchanges.get_enabled(venue)?;
        let name = connector.name().to_string();
        self.check_policy(&name, &req)?;
        if !connector.supports_asset_class(req.asset_class) {
            return Err(AgoraError::UnknownInstrument(format!(
                "{name} does not trade {}",
                req.asset_class
            )));
        }
        let provider = order_provider(connector.as_ref(), Capability::SubmitOrder)?;
        let receipt = with_retry(
            "submit_order",
            self.policy.submission_retry_budget,
            self.schedule,
            || provider.submit_order(&req),
        )
        .await?;

        let mut record = OrderRecord::from_request(&name, receipt.venue_order_id.clone(), &req);
        if !receipt.placed {
            record.transition(OrderStatus::Rejected)?;
            self.insert(record.clone());
            self.events.publish(OrderEventKind::Submitted, record.clone()).await;
            return Err(AgoraError::permanent(
                &name,
                format!("order {} was acknowledged but not placed", record.venue_order_id),
            ));
        }
        if receipt.fully_matched {
            record.set_fill(record.amount, Decimal::ZERO)?;
            record.transition(OrderStatus::Filled)?;
        }
        let result = SubmitResult {
            order_id: record.id,
            venue_order_id: record.venue_order_id.clone(),
            status: record.status,
        };
        self.insert(record.clone());
        self.events.publish(OrderEventKind::Submitted, record).await;
        Ok(result)
    }

    fn insert(&self, record: OrderRecord) {
        write(&self.store)
            .entry(venue_key(&record.venue))
            .or_default()
            .push(record);
    }

    fn find(&self, venue: &str, id: &str) -> Result<OrderRecord, AgoraError> {
        read(&self.store)
            .get(&venue_key(venue))
            .and_then(|v| v.iter().find(|r| r.matches_id(id)))
            .cloned()
            .ok_or_else(|| AgoraError::not_found(format!("order {id} on {venue}")))
    }

    fn mutate<F>(&self, venue: &str, id: OrderId, f: F) -> Result<OrderRecord, AgoraError>
    where
        F: FnOnce(&mut OrderRecord) -> Result<(), AgoraError>,
    {
        let mut store = write(&self.store);
        let rec = store
            .get_mut(&venue_key(venue))
            .and_then(|v| v.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| AgoraError::not_found(format!("order {id} on {venue}")))?;
        f(rec)?;
        Ok(rec.clone())
    }

    /// Stored order by internal or venue id.
    pub fn get(&self, venue: &str, id: &str) -> Result<OrderRecord, AgoraError> {
        self.find(venue, id)
    }

    /// Every stored order of `venue`.
    #[must_use]
    pub fn orders(&self, venue: &str) -> Vec<OrderRecord> {
        read(&self.store)
            .get(&venue_key(venue))
            .cloned()
            .unwrap_or_default()
    }

    /// Every stored order.
    #[must_use]
    pub fn all_orders(&self) -> Vec<OrderRecord> {
        read(&self.store).values().flatten().cloned().collect()
    }

    /// Cancel one order by internal or venue id.
    ///
    /// A reply reporting executed volume stores the order as partially cancelled.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::orders::cancel",
            skip(self),
        )
    )]
    pub async fn cancel(&self, venue: &str, id: &str) -> Result<OrderRecord, AgoraError> {
        self.lifecycle.ensure_running()?;
        self.cancel_one(venue, id).await
    }

    async fn cancel_one(&self, venue: &str, id: &str) -> Result<OrderRecord, AgoraError> {
        let connector = self.exchanges.get_enabled(venue)?;
        let provider = order_provider(connector.as_ref(), Capability::CancelOrder)?;
        let record = self.find(venue, id)?;
        if record.status.is_terminal() {
            return Err(AgoraError::InvalidArg(format!(
                "order {id} is already {}",
                record.status
            )));
        }
        let req = CancelRequest {
            venue_order_id: record.venue_order_id.clone(),
            pair: record.pair.clone(),
            asset_class: record.asset_class,
            side: record.side,
        };
        let receipt = with_retry(
            "cancel_order",
            self.policy.submission_retry_budget,
            self.schedule,
            || provider.cancel_order(&req),
        )
        .await?;
        let updated = self.mutate(venue, record.id, |rec| {
            if rec.status.is_terminal() {
                return Ok(());
            }
            rec.set_fill(receipt.executed, receipt.remaining)?;
            let next = if receipt.executed > Decimal::ZERO {
                OrderStatus::PartiallyCancelled
            } else {
                OrderStatus::Cancelled
            };
            rec.transition(next).map(|_| ())
        })?;
        self.events
            .publish(OrderEventKind::Cancelled, updated.clone())
            .await;
        Ok(updated)
    }

    /// Cancel every open order matching `venue` (all when `None`) and `scope`.
    ///
    /// One adapter call per order; the result maps internal ids to outcomes
    /// and never fails as a whole.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::orders::cancel_all",
            skip(self),
        )
    )]
    pub async fn cancel_all(
        &self,
        venue: Option<&str>,
        scope: &CancelAllScope,
    ) -> HashMap<String, CancelOutcome> {
        if let Err(e) = self.lifecycle.ensure_running() {
            return self
                .open_orders(venue, scope)
                .into_iter()
                .map(|r| (r.id.to_string(), CancelOutcome::Failed(e.to_string())))
                .collect();
        }
        self.cancel_many(venue, scope).await
    }

    fn open_orders(&self, venue: Option<&str>, scope: &CancelAllScope) -> Vec<OrderRecord> {
        let wanted = venue.map(venue_key);
        read(&self.store)
            .iter()
            .filter(|(k, _)| wanted.as_ref().is_none_or(|w| w == *k))
            .flat_map(|(_, v)| v.iter())
            .filter(|r| r.status.is_open() && scope.matches(r))
            .cloned()
            .collect()
    }

    async fn cancel_many(
        &self,
        venue: Option<&str>,
        scope: &CancelAllScope,
    ) -> HashMap<String, CancelOutcome> {
        let mut out = HashMap::new();
        for rec in self.open_orders(venue, scope) {
            let outcome = match self.cancel_one(&rec.venue, &rec.id.to_string()).await {
                Ok(_) => CancelOutcome::Success,
                Err(e) => CancelOutcome::Failed(e.to_string()),
            };
            out.insert(rec.id.to_string(), outcome);
        }
        out
    }

    /// Cancel everything open on `venue`.
    ///
    /// Uses the venue's bulk cancel when it advertises one, otherwise cancels
    /// order by order. Keys are internal ids, or venue ids for orders the
    /// store does not know.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::orders::cancel_all_on_venue",
            skip(self),
        )
    )]
    pub async fn cancel_all_on_venue(
        &self,
        venue: &str,
    ) -> Result<HashMap<String, CancelOutcome>, AgoraError> {
        self.lifecycle.ensure_running()?;
        let connector = self.exchanges.get_enabled(venue)?;
        if !connector.features().contains(Features::CANCEL_ALL) {
            return Ok(self.cancel_many(Some(venue), &CancelAllScope::default()).await);
        }
        let provider = order_provider(connector.as_ref(), Capability::CancelAll)?;
        let scope = CancelAllScope::default();
        let mut reply = with_retry(
            "cancel_all",
            self.policy.submission_retry_budget,
            self.schedule,
            || provider.cancel_all(&scope),
        )
        .await?;

        let mut out = HashMap::new();
        let mut events = Vec::new();
        {
            let mut store = write(&self.store);
            if let Some(list) = store.get_mut(&venue_key(venue)) {
                for rec in list.iter_mut() {
                    let Some(outcome) = reply.remove(&rec.venue_order_id) else {
                        continue;
                    };
                    if outcome.is_success() && rec.status.is_open() {
                        let next = if rec.executed > Decimal::ZERO {
                            OrderStatus::PartiallyCancelled
                        } else {
                            OrderStatus::Cancelled
                        };
                        if rec.transition(next).is_ok() {
                            rec.remaining = rec.amount - rec.executed;
                            events.push(rec.clone());
                        }
                    }
                    out.insert(rec.id.to_string(), outcome);
                }
            }
        }
        out.extend(reply);
        for rec in events {
            self.events.publish(OrderEventKind::Cancelled, rec).await;
        }
        Ok(out)
    }

    /// Diff the venue's active orders against the store.
    ///
    /// Unknown orders are added, known ones updated, and previously open
    /// orders the venue no longer reports are marked cancelled. Nothing is
    /// deleted.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::orders::reconcile",
            skip(self),
        )
    )]
    pub async fn reconcile(&self, venue: &str) -> Result<ReconcileReport, AgoraError> {
        self.lifecycle.ensure_running()?;
        let connector = self.exchanges.get_enabled(venue)?;
        let provider = order_provider(connector.as_ref(), Capability::ActiveOrders)?;
        let filter = OrderFilter::default();
        let active = with_retry(
            "active_orders",
            self.policy.submission_retry_budget,
            self.schedule,
            || provider.active_orders(&filter),
        )
        .await?;
        let name = connector.name().to_string();

        let mut report = ReconcileReport::default();
        let mut events = Vec::new();
        {
            let reported: HashSet<&str> = active.iter().map(|o| o.venue_order_id.as_str()).collect();
            let mut store = write(&self.store);
            let list = store.entry(venue_key(&name)).or_default();
            for vo in &active {
                match list.iter().position(|r| r.venue_order_id == vo.venue_order_id) {
                    Some(i) => match apply_venue_state(&mut list[i], vo) {
                        Ok(true) => {
                            report.updated += 1;
                            events.push((OrderEventKind::Updated, list[i].clone()));
                        }
                        Ok(false) => {}
                        Err(_e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(venue = %name, order = %vo.venue_order_id, error = %_e, "venue order state rejected");
                        }
                    },
                    None => {
                        let rec = OrderRecord::from_venue(&name, vo);
                        report.added += 1;
                        events.push((OrderEventKind::Discovered, rec.clone()));
                        list.push(rec);
                    }
                }
            }
            for rec in list.iter_mut() {
                if rec.status.is_open()
                    && !rec.venue_order_id.is_empty()
                    && !reported.contains(rec.venue_order_id.as_str())
                    && rec.transition(OrderStatus::Cancelled).is_ok()
                {
                    report.cancelled += 1;
                    events.push((OrderEventKind::Cancelled, rec.clone()));
                }
            }
        }
        for (kind, rec) in events {
            self.events.publish(kind, rec).await;
        }
        Ok(report)
    }

    /// Apply an order update pushed by a venue stream.
    ///
    /// Returns true when the store changed.
    pub async fn apply_venue_update(&self, venue: &str, vo: &VenueOrder) -> Result<bool, AgoraError> {
        let event = {
            let mut store = write(&self.store);
            let list = store.entry(venue_key(venue)).or_default();
            match list.iter().position(|r| r.venue_order_id == vo.venue_order_id) {
                Some(i) => {
                    if apply_venue_state(&mut list[i], vo)? {
                        let kind = if matches!(
                            list[i].status,
                            OrderStatus::Cancelled | OrderStatus::PartiallyCancelled
                        ) {
                            OrderEventKind::Cancelled
                        } else {
                            OrderEventKind::Updated
                        };
                        Some((kind, list[i].clone()))
                    } else {
                        None
                    }
                }
                None => {
                    let rec = OrderRecord::from_venue(venue, vo);
                    list.push(rec.clone());
                    Some((OrderEventKind::Discovered, rec))
                }
            }
        };
        match event {
            Some((kind, rec)) => {
                self.events.publish(kind, rec).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Subsystem for OrderManager {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start(&self) -> Result<(), AgoraError> {
        self.lifecycle
            .start_with(async { self.policy.validate() })
            .await
    }

    async fn stop(&self) -> Result<(), AgoraError> {
        self.lifecycle
            .stop_with(async {
                if self.policy.cancel_on_shutdown {
                    let _outcomes = self.cancel_many(None, &CancelAllScope::default()).await;
                    #[cfg(feature = "tracing")]
                    {
                        let failed = _outcomes.values().filter(|o| !o.is_success()).count();
                        tracing::info!(cancelled = _outcomes.len() - failed, failed, "cancelled open orders on shutdown");
                    }
                }
                Ok(())
            })
            .await
    }
}
