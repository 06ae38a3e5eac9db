//! Cross-Match Notifier
//!
//! A new demand is matched against stocked crops (and vice versa) by crop
//! name; the counterpart owners' phones get one templated SMS batch. The
//! batch is handed to [`NotificationWorker`] through a queue so registration
//! never waits for, or fails because of, SMS delivery.
//!
//! Concurrent demand/stock registrations for the same crop may each notify
//! the other side. Those duplicates are accepted; there is no idempotency key.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::MarketError;
use crate::models::{CropDemand, NewDemand, NewStock, StockedCrop};
use crate::repository::{ListingFilter, MarketRepository};
use crate::sms::NotificationGateway;

/// One dispatch cycle: unique numbers plus a message. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationBatch {
    pub phone_numbers: BTreeSet<String>,
    pub message: String,
}

// ========================================
// Queue / Worker
// ========================================

/// Sending half of the notification handoff.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationBatch>,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Never waits. Returns false when the batch was dropped (queue full or closed).
    pub fn enqueue(&self, batch: NotificationBatch) -> bool {
        let recipients = batch.phone_numbers.len();
        match self.tx.try_send(batch) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(recipients, "Notification queue full; batch dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(recipients, "Notification worker stopped; batch dropped");
                false
            }
        }
    }
}

pub struct NotificationWorker {
    rx: mpsc::Receiver<NotificationBatch>,
    gateway: NotificationGateway,
}

impl NotificationWorker {
    pub fn new(rx: mpsc::Receiver<NotificationBatch>, gateway: NotificationGateway) -> Self {
        Self { rx, gateway }
    }

    /// Runs until `shutdown` fires, then sends whatever is already queued.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Notification worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = self.rx.recv() => match batch {
                    Some(batch) => self.dispatch(batch).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Some(batch) = self.rx.recv().await {
            self.dispatch(batch).await;
            drained += 1;
        }
        info!(drained, "Notification worker stopped");
    }

    async fn dispatch(&self, batch: NotificationBatch) {
        let report = self.gateway.send_batch(&batch.phone_numbers, &batch.message).await;
        if report.failed() > 0 {
            warn!(
                sent = report.sent(),
                failed = report.failed(),
                "Notification batch finished with failures"
            );
        }
    }
}

// ========================================
// Registration use cases
// ========================================

/// A persisted listing and how many SMS batches its registration queued (0 or 1).
#[derive(Debug, Clone)]
pub struct Registered<T> {
    pub listing: T,
    pub batches_queued: usize,
}

#[derive(Clone)]
pub struct CrossMatchNotifier {
    repo: Arc<dyn MarketRepository>,
    queue: NotificationQueue,
}

impl CrossMatchNotifier {
    pub fn new(repo: Arc<dyn MarketRepository>, queue: NotificationQueue) -> Self {
        Self { repo, queue }
    }

    /// Persists a buyer demand and alerts farmers holding matching stock.
    ///
    /// Only the insert can fail the call; matching or queueing problems are logged.
    pub async fn register_demand(&self, demand: NewDemand) -> Result<Registered<CropDemand>, MarketError> {
        let demand = self.repo.insert_demand(demand).await?;

        let batches_queued = match self.notify_farmers(&demand).await {
            Ok(queued) => queued,
            Err(e) => {
                warn!(demand_id = %demand.demand_id, error = %e, "Cross-match for demand failed");
                0
            }
        };

        Ok(Registered { listing: demand, batches_queued })
    }

    /// Persists farmer stock and alerts buyers with a matching demand.
    pub async fn register_stock(&self, stock: NewStock) -> Result<Registered<StockedCrop>, MarketError> {
        let stock = self.repo.insert_stock(stock).await?;

        let batches_queued = match self.notify_buyers(&stock).await {
            Ok(queued) => queued,
            Err(e) => {
                warn!(stock_id = %stock.stock_id, error = %e, "Cross-match for stock failed");
                0
            }
        };

        Ok(Registered { listing: stock, batches_queued })
    }

    async fn notify_farmers(&self, demand: &CropDemand) -> Result<usize, MarketError> {
        let stocks = self.repo.find_stocks(&ListingFilter::by_name(&demand.crop_name)).await?;
        let farmer_ids: BTreeSet<String> = stocks.into_iter().map(|s| s.stock.farmer_id).collect();

        let message = demand_alert(demand);
        self.queue_for_owners(&farmer_ids, message, &demand.crop_name).await
    }

    async fn notify_buyers(&self, stock: &StockedCrop) -> Result<usize, MarketError> {
        let demands = self.repo.find_demands(&ListingFilter::by_name(&stock.crop_name)).await?;
        let buyer_ids: BTreeSet<String> = demands.into_iter().map(|d| d.demand.buyer_id).collect();

        let message = stock_alert(stock);
        self.queue_for_owners(&buyer_ids, message, &stock.crop_name).await
    }

    async fn queue_for_owners(
        &self,
        owner_ids: &BTreeSet<String>,
        message: String,
        crop: &str,
    ) -> Result<usize, MarketError> {
        if owner_ids.is_empty() {
            info!(crop, "No cross-match; nothing to notify");
            return Ok(0);
        }

        let contacts = self.repo.find_owner_contacts_by_ids(owner_ids).await?;
        let phone_numbers: BTreeSet<String> = contacts.into_values().collect();
        if phone_numbers.is_empty() {
            info!(crop, owners = owner_ids.len(), "Matched owners have no phone on file");
            return Ok(0);
        }

        info!(crop, recipients = phone_numbers.len(), "Queueing cross-match notification");
        let queued = self.queue.enqueue(NotificationBatch { phone_numbers, message });
        Ok(usize::from(queued))
    }
}

// ========================================
// Message templates
// ========================================

/// Sent to farmers when a buyer posts a demand.
pub fn demand_alert(demand: &CropDemand) -> String {
    format!(
        "📢 New Demand Alert!\n\nCrop: {}\nAmount: {}\nPrice: {}\nBuyer Contact: {}",
        demand.crop_name, demand.amount, demand.price, demand.contact
    )
}

/// Sent to buyers when a farmer posts stock.
pub fn stock_alert(stock: &StockedCrop) -> String {
    format!(
        "📢 Fresh stock alert! {} is now available at ₹{}/unit. Contact the farmer directly at {} to buy.",
        stock.crop_name, stock.price, stock.contact_of_farmer
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::geo::Coordinate;
    use crate::models::{
        role, DemandListing, Equipment, NewEquipment, NewStore, NewUser, StockListing, Store, User,
    };
    use crate::repository::{RepoResult, SqliteRepository};
    use std::collections::HashMap;
    use crate::sms::{DispatchFailure, SmsSender};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Fixture {
        repo: Arc<SqliteRepository>,
        notifier: CrossMatchNotifier,
        rx: mpsc::Receiver<NotificationBatch>,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(SqliteRepository::new(open_in_memory().await.unwrap()));
        let (queue, rx) = NotificationQueue::new(8);
        let notifier = CrossMatchNotifier::new(repo.clone(), queue);
        Fixture { repo, notifier, rx }
    }

    async fn user(repo: &SqliteRepository, r: &str, name: &str, phone: Option<&str>) -> User {
        repo.insert_user(NewUser {
            role: r.into(),
            name: name.into(),
            phone: phone.map(String::from),
            location: Some(Coordinate::new(10.52, 76.21)),
        })
        .await
        .unwrap()
    }

    fn stock(farmer: &User, crop: &str) -> NewStock {
        NewStock {
            crop_name: crop.into(),
            amount: 500.0,
            price: 32.5,
            farmer_id: farmer.user_id.clone(),
            contact_of_farmer: "9111111111".into(),
        }
    }

    fn demand(buyer: &User, crop: &str) -> NewDemand {
        NewDemand {
            crop_name: crop.into(),
            amount: 200.0,
            price: 35.0,
            buyer_id: buyer.user_id.clone(),
            contact: "9222222222".into(),
        }
    }

    #[tokio::test]
    async fn stock_registration_alerts_matching_buyer_case_insensitively() {
        let mut f = fixture().await;
        let buyer = user(&f.repo, role::BUYER, "Anita", Some("9333333333")).await;
        let farmer = user(&f.repo, role::FARMER, "Ravi", Some("9444444444")).await;
        f.repo.insert_demand(demand(&buyer, "rice")).await.unwrap();

        let registered = f.notifier.register_stock(stock(&farmer, "Rice")).await.unwrap();
        assert_eq!(registered.batches_queued, 1);
        assert_eq!(registered.listing.crop_name, "Rice");

        let batch = f.rx.try_recv().unwrap();
        assert_eq!(batch.phone_numbers, BTreeSet::from(["9333333333".to_string()]));
        assert!(batch.message.contains("Rice is now available at ₹32.5/unit"));
        assert!(batch.message.contains("9111111111"));
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn demand_without_stock_sends_nothing() {
        let mut f = fixture().await;
        let buyer = user(&f.repo, role::BUYER, "Anita", Some("9333333333")).await;

        let registered = f.notifier.register_demand(demand(&buyer, "Cardamom")).await.unwrap();
        assert_eq!(registered.batches_queued, 0);
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn demand_alert_reaches_each_farmer_once() {
        let mut f = fixture().await;
        let buyer = user(&f.repo, role::BUYER, "Anita", Some("9333333333")).await;
        let ravi = user(&f.repo, role::FARMER, "Ravi", Some("9444444444")).await;
        let meera = user(&f.repo, role::FARMER, "Meera", Some("9555555555")).await;
        let silent = user(&f.repo, role::FARMER, "No Phone", None).await;

        // 同じ farmer の複数在庫でも 1 通
        f.repo.insert_stock(stock(&ravi, "Red Rice")).await.unwrap();
        f.repo.insert_stock(stock(&ravi, "rice")).await.unwrap();
        f.repo.insert_stock(stock(&meera, "RICE")).await.unwrap();
        f.repo.insert_stock(stock(&silent, "rice")).await.unwrap();
        f.repo.insert_stock(stock(&meera, "Wheat")).await.unwrap();

        f.notifier.register_demand(demand(&buyer, "Rice")).await.unwrap();

        let batch = f.rx.try_recv().unwrap();
        assert_eq!(
            batch.phone_numbers,
            BTreeSet::from(["9444444444".to_string(), "9555555555".to_string()])
        );
        assert!(batch.message.starts_with("📢 New Demand Alert!"));
        assert!(batch.message.contains("Buyer Contact: 9222222222"));
    }

    #[tokio::test]
    async fn owners_without_phones_queue_nothing() {
        let mut f = fixture().await;
        let buyer = user(&f.repo, role::BUYER, "Anita", None).await;
        let farmer = user(&f.repo, role::FARMER, "Ravi", Some("9444444444")).await;
        f.repo.insert_demand(demand(&buyer, "Banana")).await.unwrap();

        let registered = f.notifier.register_stock(stock(&farmer, "banana")).await.unwrap();
        assert_eq!(registered.batches_queued, 0);
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_does_not_fail_registration() {
        let repo = Arc::new(SqliteRepository::new(open_in_memory().await.unwrap()));
        let (queue, rx) = NotificationQueue::new(1);
        let notifier = CrossMatchNotifier::new(repo.clone(), queue);
        drop(rx);

        let buyer = user(&repo, role::BUYER, "Anita", Some("9333333333")).await;
        let farmer = user(&repo, role::FARMER, "Ravi", Some("9444444444")).await;
        repo.insert_demand(demand(&buyer, "Coconut")).await.unwrap();

        let registered = notifier.register_stock(stock(&farmer, "Coconut")).await.unwrap();
        assert_eq!(registered.batches_queued, 0);
    }

    #[tokio::test]
    async fn unknown_farmer_fails_registration() {
        let f = fixture().await;
        let ghost = User {
            user_id: "ghost".into(),
            role: role::FARMER.into(),
            name: "Ghost".into(),
            phone: None,
            lat: None,
            lng: None,
            created_at_ms: 0,
            updated_at_ms: 0,
        };
        let err = f.notifier.register_stock(stock(&ghost, "Rice")).await.unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    /// Writes go to SQLite; every read used for cross-matching fails.
    struct LookupDown {
        inner: SqliteRepository,
    }

    fn lookup_down<T>() -> RepoResult<T> {
        Err(MarketError::RepositoryUnavailable("read replica offline".into()))
    }

    #[async_trait]
    impl MarketRepository for LookupDown {
        async fn find_stores(&self, _: &ListingFilter) -> RepoResult<Vec<Store>> {
            lookup_down()
        }
        async fn find_equipment(&self, _: &ListingFilter) -> RepoResult<Vec<Equipment>> {
            lookup_down()
        }
        async fn find_stocks(&self, _: &ListingFilter) -> RepoResult<Vec<StockListing>> {
            lookup_down()
        }
        async fn find_demands(&self, _: &ListingFilter) -> RepoResult<Vec<DemandListing>> {
            lookup_down()
        }
        async fn insert_user(&self, user: NewUser) -> RepoResult<User> {
            self.inner.insert_user(user).await
        }
        async fn list_users(&self) -> RepoResult<Vec<User>> {
            self.inner.list_users().await
        }
        async fn insert_store(&self, store: NewStore) -> RepoResult<Store> {
            self.inner.insert_store(store).await
        }
        async fn insert_equipment(&self, equipment: NewEquipment) -> RepoResult<Equipment> {
            self.inner.insert_equipment(equipment).await
        }
        async fn insert_stock(&self, stock: NewStock) -> RepoResult<StockedCrop> {
            self.inner.insert_stock(stock).await
        }
        async fn insert_demand(&self, demand: NewDemand) -> RepoResult<CropDemand> {
            self.inner.insert_demand(demand).await
        }
        async fn find_owner_contacts_by_ids(
            &self,
            _: &BTreeSet<String>,
        ) -> RepoResult<HashMap<String, String>> {
            lookup_down()
        }
    }

    #[tokio::test]
    async fn failed_cross_match_still_registers_listing() {
        let inner = SqliteRepository::new(open_in_memory().await.unwrap());
        let buyer = user(&inner, role::BUYER, "Anita", Some("9333333333")).await;
        let farmer = user(&inner, role::FARMER, "Ravi", Some("9444444444")).await;
        let repo = Arc::new(LookupDown { inner });
        let (queue, mut rx) = NotificationQueue::new(4);
        let notifier = CrossMatchNotifier::new(repo, queue);

        let wanted = notifier.register_demand(demand(&buyer, "Rice")).await.unwrap();
        assert_eq!(wanted.batches_queued, 0);
        assert_eq!(wanted.listing.buyer_id, buyer.user_id);

        let stocked = notifier.register_stock(stock(&farmer, "Rice")).await.unwrap();
        assert_eq!(stocked.batches_queued, 0);
        assert_eq!(stocked.listing.farmer_id, farmer.user_id);

        assert!(rx.try_recv().is_err());
    }

    #[derive(Default)]
    struct CountingSender {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SmsSender for CountingSender {
        async fn send(&self, to: &str, _body: &str) -> Result<(), DispatchFailure> {
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }

        fn provider_name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn worker_drains_queue_on_shutdown() {
        let sender = Arc::new(CountingSender::default());
        let gateway = NotificationGateway::new(sender.clone(), "+91", 2);
        let (queue, rx) = NotificationQueue::new(8);

        for phone in ["9000000001", "9000000002"] {
            assert!(queue.enqueue(NotificationBatch {
                phone_numbers: BTreeSet::from([phone.to_string()]),
                message: "hello".into(),
            }));
        }

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        tokio::time::timeout(
            Duration::from_secs(5),
            NotificationWorker::new(rx, gateway).run(shutdown),
        )
        .await
        .unwrap();

        let mut sent = sender.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec!["+919000000001", "+919000000002"]);
        assert!(!queue.enqueue(NotificationBatch {
            phone_numbers: BTreeSet::from(["9000000003".to_string()]),
            message: "late".into(),
        }));
    }
}
