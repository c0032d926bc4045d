//! In-memory customer data provider.
//!
//! Serves a fixed directory of fifty customers as reactive sequences: the
//! whole directory as a multi-value publisher, point lookups and writes as
//! [`Mono`]s. Request routing and body encoding belong to the caller.

use std::ops::RangeInclusive;

use crate::core::traits::{BoxPublisher, PublisherExt};
use crate::mono::Mono;
use crate::scheduler::Scheduler;
use crate::sources::IterSource;

/// Ids present in the directory.
pub const CUSTOMER_IDS: RangeInclusive<u32> = 1..=50;

/// A customer record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Customer {
    pub id: u32,
    pub name: String,
}

impl Customer {
    /// Create a new customer record
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// The directory entry for `id`
    pub fn numbered(id: u32) -> Self {
        Self::new(id, format!("Customer{}", id))
    }
}

/// Resource path of a created customer.
pub fn location(customer: &Customer) -> String {
    format!("/customer/{}", customer.id)
}

/// Read and write access to the customer directory.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    scheduler: Scheduler,
}

impl CustomerRepository {
    /// Create a repository that produces listings on `scheduler`
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Every customer, produced on a scheduler lane. Order is not guaranteed.
    pub fn all(&self) -> BoxPublisher<Customer> {
        IterSource::new(CUSTOMER_IDS)
            .flat_map(|id| Mono::just(id).map(Customer::numbered))
            .subscribe_on(&self.scheduler)
            .boxed()
    }

    /// The customer with `id`, or an empty `Mono` when there is none
    pub fn by_id(&self, id: u32) -> Mono<Customer> {
        if CUSTOMER_IDS.contains(&id) {
            Mono::just(Customer::numbered(id))
        } else {
            tracing::debug!(id, "customer not found");
            Mono::empty()
        }
    }

    /// Accept a customer body; resolves to the stored record
    pub fn create(&self, customer: Mono<Customer>) -> Mono<Customer> {
        customer.map(|created| {
            tracing::info!(id = created.id, "customer created");
            created
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::StepVerifier;

    fn repository() -> CustomerRepository {
        CustomerRepository::new(Scheduler::parallel("customers", 2).unwrap())
    }

    #[tokio::test]
    async fn test_by_id_finds_known_customer() {
        StepVerifier::create(repository().by_id(10))
            .expect_next(Customer::new(10, "Customer10"))
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_by_id_out_of_range_is_empty() {
        StepVerifier::create(repository().by_id(51))
            .expect_complete()
            .verify()
            .await
            .unwrap();
        assert_eq!(repository().by_id(0).resolve().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_all_lists_fifty_customers() {
        let mut customers = repository()
            .all()
            .collect_list()
            .resolve()
            .await
            .unwrap()
            .unwrap();
        customers.sort_by_key(|c| c.id);
        assert_eq!(customers.len(), 50);
        assert_eq!(customers[0], Customer::numbered(1));
        assert_eq!(customers[49].name, "Customer50");
    }

    #[tokio::test]
    async fn test_create_echoes_body_and_location() {
        let body = Customer::new(77, "New Customer");
        let created = repository()
            .create(Mono::just(body.clone()))
            .resolve()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created, body);
        assert_eq!(location(&created), "/customer/77");
    }
}
