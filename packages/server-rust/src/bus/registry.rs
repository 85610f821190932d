use std::sync::Arc;

use dashmap::DashMap;
use esb_core::policy::check_transaction_policies;
use esb_core::{QName, ServiceInterface, ServiceSecurity, TransactionFailure};
use parking_lot::RwLock;
use tracing::info;

use crate::traits::ServiceImplementation;

// ---------------------------------------------------------------------------
// RegisteredService
// ---------------------------------------------------------------------------

/// A service as known to a domain: its name, contract, and implementation.
pub struct RegisteredService {
    pub name: QName,
    pub interface: ServiceInterface,
    pub security: ServiceSecurity,
    pub implementation: Arc<dyn ServiceImplementation>,
}

impl RegisteredService {
    #[must_use]
    pub fn new(
        name: QName,
        interface: ServiceInterface,
        implementation: Arc<dyn ServiceImplementation>,
    ) -> Self {
        Self {
            name,
            interface,
            security: ServiceSecurity::new(),
            implementation,
        }
    }

    #[must_use]
    pub fn with_security(mut self, security: ServiceSecurity) -> Self {
        self.security = security;
        self
    }
}

impl std::fmt::Debug for RegisteredService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredService")
            .field("name", &self.name)
            .field("interface", &self.interface)
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

/// Errors rejecting a registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("service {0} is already registered")]
    Duplicate(QName),
    #[error("operation {operation} of service {service} declares {source}")]
    InvalidPolicy {
        service: QName,
        operation: String,
        #[source]
        source: TransactionFailure,
    },
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Registry of the services deployed in a domain.
///
/// Services are started in registration order and stopped in reverse order.
pub struct ServiceRegistry {
    /// Name-based lookup: service name -> registered service.
    by_name: DashMap<QName, Arc<RegisteredService>>,
    /// Registration order for deterministic start/stop sequencing.
    init_order: RwLock<Vec<QName>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            init_order: RwLock::new(Vec::new()),
        }
    }

    /// Register a service after checking every operation's transaction
    /// policies for contradictions.
    ///
    /// # Errors
    ///
    /// Returns `Duplicate` if the name is taken, or `InvalidPolicy` for the
    /// first operation with a contradictory policy combination.
    pub fn register(&self, service: RegisteredService) -> Result<Arc<RegisteredService>, RegistrationError> {
        for op in service.interface.operations() {
            check_transaction_policies(op.required_policies()).map_err(|source| {
                RegistrationError::InvalidPolicy {
                    service: service.name.clone(),
                    operation: op.name().to_string(),
                    source,
                }
            })?;
        }

        let name = service.name.clone();
        let arc = Arc::new(service);
        match self.by_name.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(RegistrationError::Duplicate(name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&arc));
            }
        }
        self.init_order.write().push(name.clone());
        info!(service = %name, "service registered");
        Ok(arc)
    }

    /// Retrieve a service by its name.
    pub fn get(&self, name: &QName) -> Option<Arc<RegisteredService>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<QName> {
        self.init_order.read().clone()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Start all registered services in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if any service's `start()` call fails.
    pub async fn start_all(&self) -> anyhow::Result<()> {
        let order = self.init_order.read().clone();
        for name in &order {
            if let Some(service) = self.get(name) {
                service.implementation.start().await?;
            }
        }
        Ok(())
    }

    /// Stop all registered services in reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if any service's `stop()` call fails.
    pub async fn stop_all(&self) -> anyhow::Result<()> {
        let order = self.init_order.read().clone();
        for name in order.iter().rev() {
            if let Some(service) = self.get(name) {
                service.implementation.stop().await?;
            }
        }
        Ok(())
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use esb_core::{Message, ServiceOperation, TransactionPolicy};

    use super::*;
    use crate::traits::ServiceRequest;

    /// Test service that records lifecycle calls.
    struct TestService {
        name: &'static str,
        order_log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ServiceImplementation for TestService {
        async fn invoke(&self, _request: ServiceRequest) -> anyhow::Result<Message> {
            Ok(Message::new())
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.order_log.lock().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.order_log.lock().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn service(name: &'static str, log: &Arc<parking_lot::Mutex<Vec<String>>>) -> RegisteredService {
        RegisteredService::new(
            QName::local(name),
            ServiceInterface::new([ServiceOperation::in_out("run")]),
            Arc::new(TestService {
                name,
                order_log: Arc::clone(log),
            }),
        )
    }

    #[test]
    fn register_and_get_by_name() {
        let registry = ServiceRegistry::new();
        let log = Arc::default();
        registry.register(service("Orders", &log)).unwrap();

        let svc = registry.get(&QName::local("Orders")).unwrap();
        assert_eq!(svc.name, QName::local("Orders"));
        assert!(registry.get(&QName::local("Missing")).is_none());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = ServiceRegistry::new();
        let log = Arc::default();
        registry.register(service("Orders", &log)).unwrap();
        let err = registry.register(service("Orders", &log)).unwrap_err();
        assert!(matches!(err, RegistrationError::Duplicate(n) if n == QName::local("Orders")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn contradictory_transaction_policies_rejected() {
        let registry = ServiceRegistry::new();
        let op = ServiceOperation::in_out("run")
            .requires(TransactionPolicy::SuspendsTransaction)
            .requires(TransactionPolicy::PropagatesTransaction);
        let svc = RegisteredService::new(
            QName::local("Bad"),
            ServiceInterface::new([op]),
            Arc::new(TestService {
                name: "Bad",
                order_log: Arc::default(),
            }),
        );

        let err = registry.register(svc).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::InvalidPolicy { ref operation, source: TransactionFailure::InvalidPolicy { .. }, .. }
                if operation == "run"
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn start_and_stop_follow_registration_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let registry = ServiceRegistry::new();
        registry.register(service("first", &log)).unwrap();
        registry.register(service("second", &log)).unwrap();
        registry.register(service("third", &log)).unwrap();

        registry.start_all().await.unwrap();
        registry.stop_all().await.unwrap();

        assert_eq!(
            log.lock().clone(),
            [
                "start:first",
                "start:second",
                "start:third",
                "stop:third",
                "stop:second",
                "stop:first"
            ]
        );
    }
}
