//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → StoringEventBus → EventStore → Projections / Billing, then Repository
//!
//! Verifies:
//! - Commands produce events that update read models correctly
//! - Billing reacts to activations through the same bus
//! - Replayed read models equal the live ones
//! - Failed appends never reach subscribers

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use flowops_billing::{PlanPricing, RecordPayment};
    use flowops_core::{Cancellation, CustomerId, ErrorKind, SubscriptionId, SystemClock};
    use flowops_events::{EventBus, EventKind, InMemoryEventBus, IntegrationEvent, InvoiceIssued};
    use flowops_subscriptions::{InMemorySubscriptionRepository, SubscriptionRepository, SubscriptionStatus};

    use crate::billing::BillingHandler;
    use crate::commands::{CreateSubscription, SubscriptionCommandService};
    use crate::event_store::{
        EventStore, EventStoreError, InMemoryEventStore, PublishError, StoredEventRecord,
        StoringEventBus,
    };
    use crate::idempotency::InMemoryIdempotencyStore;
    use crate::projections::{
        CustomerReport, CustomerReportProjection, Projection, ReplayEngine, ReplayOptions,
        SnapshotOrder, SnapshotPageQuery, SortDirection, SubscriptionSnapshot,
        SubscriptionSnapshotProjection, subscribe_projection,
    };
    use crate::queries::QueryService;
    use crate::read_model::{InMemoryReportStore, InMemorySnapshotStore, ReportStore, SnapshotStore};
    use crate::retry::RetryPolicy;

    type Bus = StoringEventBus<Arc<InMemoryEventStore>, InMemoryEventBus>;
    type Repository = Arc<InMemorySubscriptionRepository>;

    struct Stack {
        store: Arc<InMemoryEventStore>,
        reports: Arc<InMemoryReportStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        commands: Arc<SubscriptionCommandService<Repository, Bus, Arc<InMemoryIdempotencyStore>>>,
        queries: QueryService<Repository>,
    }

    fn setup() -> Stack {
        let store = Arc::new(InMemoryEventStore::new());
        let bus = Arc::new(StoringEventBus::new(Arc::clone(&store), InMemoryEventBus::new()));
        let repository: Repository = Arc::new(InMemorySubscriptionRepository::new());
        let reports = Arc::new(InMemoryReportStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let pricing = PlanPricing::standard();

        let report_projection = Arc::new(CustomerReportProjection::new(Arc::clone(&reports)));
        let snapshot_projection = Arc::new(SubscriptionSnapshotProjection::new(Arc::clone(&snapshots)));

        // Subscribe everything BEFORE any events are published
        subscribe_projection(bus.as_ref(), Arc::clone(&report_projection));
        subscribe_projection(bus.as_ref(), Arc::clone(&snapshot_projection));
        BillingHandler::register(
            &bus,
            pricing.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            Arc::new(SystemClock),
        );

        let log: Arc<dyn EventStore> = store.clone();
        let replay = ReplayEngine::new(
            Arc::clone(&log),
            vec![
                report_projection as Arc<dyn Projection>,
                snapshot_projection as Arc<dyn Projection>,
            ],
        );
        let queries = QueryService::new(
            Arc::clone(&repository),
            log,
            reports.clone(),
            snapshots.clone(),
            replay,
            pricing,
        );
        let commands = Arc::new(SubscriptionCommandService::new(
            repository,
            bus,
            Arc::new(InMemoryIdempotencyStore::new()),
            Arc::new(SystemClock),
        ));

        Stack {
            store,
            reports,
            snapshots,
            commands,
            queries,
        }
    }

    async fn create(stack: &Stack, customer: CustomerId, plan: &str) -> SubscriptionId {
        stack
            .commands
            .create_subscription(CreateSubscription::new(customer, plan), &Cancellation::new())
            .await
            .expect("create subscription")
            .subscription_id
    }

    async fn issued_invoices(stack: &Stack) -> Vec<InvoiceIssued> {
        stack
            .store
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::InvoiceIssued(invoice) => Some(invoice),
                _ => None,
            })
            .collect()
    }

    async fn read_models(stack: &Stack) -> (Vec<CustomerReport>, Vec<SubscriptionSnapshot>) {
        let reports = stack.reports.list().await.unwrap();
        let query = SnapshotPageQuery::new(1, 200)
            .unwrap()
            .ordered_by(SnapshotOrder::ActivatedAt, SortDirection::Asc);
        let snapshots = stack.snapshots.page(&query).await.unwrap().items;
        (reports, snapshots)
    }

    #[tokio::test]
    async fn create_then_cancel_updates_report_and_snapshot() {
        let stack = setup();
        let cancel = Cancellation::new();
        let customer = CustomerId::new();

        let id = create(&stack, customer, "BASIC").await;

        let report = stack.queries.customer_report(customer).await.unwrap();
        assert_eq!(report.active_subscriptions, 1);
        assert_eq!(stack.queries.active_subscription_ids(customer).await.unwrap(), vec![id]);
        let snapshot = stack.queries.subscription_snapshot(id).await.unwrap();
        assert_eq!(snapshot.status, SubscriptionStatus::Active);
        assert_eq!(snapshot.plan_code, "BASIC");

        stack.commands.cancel(id, &cancel).await.unwrap();

        let report = stack.queries.customer_report(customer).await.unwrap();
        assert_eq!(report.active_subscriptions, 0);
        assert!(stack.queries.active_subscription_ids(customer).await.unwrap().is_empty());
        let snapshot = stack.queries.subscription_snapshot(id).await.unwrap();
        assert_eq!(snapshot.status, SubscriptionStatus::Canceled);
        assert!(snapshot.cancelled_at.is_some());

        let subscription = stack.queries.subscription(id).await.unwrap();
        assert_eq!(subscription.status(), SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn invoice_is_issued_and_paid() {
        let stack = setup();
        let customer = CustomerId::new();
        let id = create(&stack, customer, "basic").await;

        let invoices = issued_invoices(&stack).await;
        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_eq!(invoice.subscription_id, id);
        assert_eq!(invoice.amount, Decimal::new(999, 2));
        assert_eq!(invoice.currency, "PLN");

        stack
            .commands
            .record_payment(RecordPayment {
                invoice_id: invoice.invoice_id,
                customer_id: customer,
                subscription_id: id,
                amount: invoice.amount,
                currency: Some("pln".to_string()),
                payment_method: Some("card".to_string()),
                transaction_id: Some("tx-42".to_string()),
            })
            .await
            .unwrap();

        let report = stack.queries.customer_report(customer).await.unwrap();
        assert_eq!(report.total_invoiced, Decimal::new(999, 2));
        assert_eq!(report.total_paid, Decimal::new(999, 2));
    }

    #[tokio::test]
    async fn replay_matches_live_projection() {
        let stack = setup();
        let cancel = Cancellation::new();
        let alice = CustomerId::new();
        let bob = CustomerId::new();

        let a1 = create(&stack, alice, "BASIC").await;
        let a2 = create(&stack, alice, "PREMIUM").await;
        let b1 = create(&stack, bob, "STANDARD").await;
        stack.commands.suspend(a1, &cancel).await.unwrap();
        stack.commands.resume(a1, &cancel).await.unwrap();
        stack.commands.cancel(a2, &cancel).await.unwrap();
        stack.commands.suspend(b1, &cancel).await.unwrap();

        let live = read_models(&stack).await;
        assert_eq!(live.0.len(), 2);
        assert_eq!(live.1.len(), 3);

        let summary = stack
            .queries
            .replay(ReplayOptions::reset(), &cancel)
            .await
            .unwrap();
        assert_eq!(summary.total_events, stack.store.len() as u64);
        assert_eq!(summary.skipped_events, 0);

        assert_eq!(read_models(&stack).await, live);
    }

    #[tokio::test]
    async fn replay_twice_with_reset_is_stable() {
        let stack = setup();
        let cancel = Cancellation::new();
        let customer = CustomerId::new();
        let id = create(&stack, customer, "STANDARD").await;
        create(&stack, customer, "BASIC").await;
        stack.commands.cancel(id, &cancel).await.unwrap();

        stack.queries.replay(ReplayOptions::reset(), &cancel).await.unwrap();
        let first = read_models(&stack).await;
        stack.queries.replay(ReplayOptions::reset(), &cancel).await.unwrap();
        let second = read_models(&stack).await;

        assert_eq!(first, second);
        let report = stack.queries.customer_report(customer).await.unwrap();
        assert_eq!(report.active_subscriptions, 1);
        assert_eq!(report.total_invoiced, Decimal::new(999 + 1999, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_with_one_key_create_once() {
        let stack = setup();
        let customer = CustomerId::new();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let commands = Arc::clone(&stack.commands);
                tokio::spawn(async move {
                    commands
                        .create_subscription(
                            CreateSubscription::new(customer, "BASIC").with_idempotency_key("checkout-7"),
                            &Cancellation::new(),
                        )
                        .await
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let winner = outcomes[0].subscription_id;
        assert!(outcomes.iter().all(|o| o.subscription_id == winner));
        assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);

        let subscriptions = stack.commands.repository().list_by_customer(customer).await.unwrap();
        assert_eq!(subscriptions.len(), 1);
        // One activation and its invoice.
        assert_eq!(stack.store.len(), 2);
        let report = stack.queries.customer_report(customer).await.unwrap();
        assert_eq!(report.active_subscriptions, 1);
        assert_eq!(report.total_invoiced, Decimal::new(999, 2));
    }

    #[tokio::test]
    async fn concurrent_creates_for_many_customers_all_land() {
        let stack = setup();
        let customers: Vec<CustomerId> = (0..16).map(|_| CustomerId::new()).collect();

        let tasks: Vec<_> = customers
            .iter()
            .map(|&customer| {
                let commands = Arc::clone(&stack.commands);
                tokio::spawn(async move {
                    commands
                        .create_subscription(CreateSubscription::new(customer, "BASIC"), &Cancellation::new())
                        .await
                        .unwrap()
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        for customer in customers {
            let report = stack.queries.customer_report(customer).await.unwrap();
            assert_eq!(report.active_subscriptions, 1);
            assert_eq!(report.total_invoiced, Decimal::new(999, 2));
        }
        assert_eq!(stack.commands.repository().len(), 16);
    }

    #[tokio::test]
    async fn idempotent_create_counts_once() {
        let stack = setup();
        let customer = CustomerId::new();
        let command = CreateSubscription::new(customer, "PREMIUM").with_idempotency_key("req-1");
        let cancel = Cancellation::new();

        let first = stack.commands.create_subscription(command.clone(), &cancel).await.unwrap();
        let again = stack.commands.create_subscription(command, &cancel).await.unwrap();

        assert_eq!(first.subscription_id, again.subscription_id);
        assert!(again.replayed);
        let report = stack.queries.customer_report(customer).await.unwrap();
        assert_eq!(report.active_subscriptions, 1);
        assert_eq!(issued_invoices(&stack).await.len(), 1);
    }

    #[tokio::test]
    async fn queries_cover_lookups_and_listings() {
        let stack = setup();
        let cancel = Cancellation::new();
        let customer = CustomerId::new();
        let kept = create(&stack, customer, "BASIC").await;
        let dropped = create(&stack, customer, "STANDARD").await;
        stack.commands.cancel(dropped, &cancel).await.unwrap();

        let missing = stack.queries.subscription(SubscriptionId::new()).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let active = stack
            .queries
            .subscriptions_by_customer(customer, Some(SubscriptionStatus::Active))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].subscription_id, kept);

        let page = stack
            .queries
            .subscriptions_page(&SnapshotPageQuery::new(1, 1).unwrap().for_customer(customer))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);

        let bad_page = SnapshotPageQuery {
            page: 0,
            ..SnapshotPageQuery::default()
        };
        let err = stack.queries.subscriptions_page(&bad_page).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // 2 activations, 2 invoices, 1 cancellation
        let records = stack.queries.events().await.unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.windows(2).all(|w| (w[0].occurred_on, w[0].id) < (w[1].occurred_on, w[1].id)));

        let plans: Vec<String> = stack.queries.plans().into_iter().map(|p| p.code).collect();
        assert_eq!(plans, vec!["BASIC", "STANDARD", "PREMIUM"]);

        let fresh = CustomerId::new();
        assert_eq!(
            stack.queries.customer_report(fresh).await.unwrap(),
            CustomerReport::new(fresh)
        );
    }

    struct RejectingStore;

    #[async_trait]
    impl EventStore for RejectingStore {
        async fn append(&self, _event: &IntegrationEvent) -> Result<(), EventStoreError> {
            Err(EventStoreError::Database("read-only replica".to_string()))
        }

        async fn get_all(&self) -> Result<Vec<IntegrationEvent>, EventStoreError> {
            Ok(Vec::new())
        }

        async fn list_records(&self) -> Result<Vec<StoredEventRecord>, EventStoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn failing_store_never_reaches_projections() {
        let bus = Arc::new(StoringEventBus::new(RejectingStore, InMemoryEventBus::new()));
        let reports = Arc::new(InMemoryReportStore::new());
        subscribe_projection(
            bus.as_ref(),
            Arc::new(CustomerReportProjection::new(Arc::clone(&reports))),
        );

        let commands = SubscriptionCommandService::new(
            InMemorySubscriptionRepository::new(),
            Arc::clone(&bus),
            InMemoryIdempotencyStore::new(),
            Arc::new(SystemClock),
        );
        let err = commands
            .create_subscription(CreateSubscription::new(CustomerId::new(), "BASIC"), &Cancellation::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StoreFailure);
        assert!(matches!(
            err,
            crate::commands::CommandError::Publish(PublishError::Store(_))
        ));
        assert!(reports.list().await.unwrap().is_empty());
        // The direct publish path behaves the same way.
        let direct = bus
            .publish(IntegrationEvent::new(
                EventKind::SubscriptionCancelled(flowops_events::SubscriptionCancelled {
                    subscription_id: SubscriptionId::new(),
                    customer_id: CustomerId::new(),
                    plan_code: "BASIC".to_string(),
                    cancelled_at: chrono::Utc::now(),
                }),
                chrono::Utc::now(),
            ))
            .await;
        assert!(matches!(direct, Err(PublishError::Store(_))));
        assert!(reports.list().await.unwrap().is_empty());
    }
}
