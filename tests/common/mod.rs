//! Shared harness: both sample kinds wired to one simulated backend, with
//! reconciles driven by hand.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use operatify::operatify_reconciler::{
    GenericController, InMemoryInstanceStore, InstanceKey, InstanceStore, ManagedInstance,
    ObjectMeta, ReconcileOutcome, ReconcileParameters, ResourceSpec, Result,
    permission_annotation_key, DEFAULT_ANNOTATION_BASE,
};
use operatify::operatify_sim::{
    ADefinition, ASpec, BDefinition, BSpec, SimulatedBackend, SimulatedResourceManager,
};

pub const NAMESPACE: &str = "default";

pub fn params() -> ReconcileParameters {
    ReconcileParameters::new(
        Duration::from_millis(10),
        Duration::from_millis(20),
        Duration::from_millis(30),
    )
    .with_operation_timeout(Duration::from_millis(500))
}

pub struct Harness {
    pub backend: SimulatedBackend,
    pub a_store: Arc<InMemoryInstanceStore<ASpec>>,
    pub b_store: Arc<InMemoryInstanceStore<BSpec>>,
    pub a: GenericController<ASpec>,
    pub b: GenericController<BSpec>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(SimulatedBackend::new(), params())
    }

    pub fn with(backend: SimulatedBackend, params: ReconcileParameters) -> Self {
        let a_store = Arc::new(InMemoryInstanceStore::<ASpec>::new());
        let b_store = Arc::new(InMemoryInstanceStore::<BSpec>::new());
        let manager = Arc::new(SimulatedResourceManager::new(backend.clone()));

        let a = GenericController::builder()
            .with_store(a_store.clone())
            .with_manager(manager.clone())
            .with_definition(Arc::new(ADefinition))
            .with_params(params)
            .build()
            .unwrap();
        let b = GenericController::builder()
            .with_store(b_store.clone())
            .with_manager(manager)
            .with_definition(Arc::new(BDefinition::new(a_store.clone())))
            .with_params(params)
            .build()
            .unwrap();

        Self {
            backend,
            a_store,
            b_store,
            a,
            b,
        }
    }

    pub async fn create_a(&self, name: &str, permissions: Option<&str>) -> InstanceKey {
        create(&self.a_store, name, permissions, ASpec::new(name)).await
    }

    pub async fn create_b(&self, spec: BSpec) -> InstanceKey {
        let name = spec.id.clone();
        create(&self.b_store, &name, None, spec).await
    }

    pub async fn reconcile_a(&self, key: &InstanceKey) -> ReconcileOutcome {
        self.try_reconcile_a(key).await.unwrap()
    }

    pub async fn try_reconcile_a(&self, key: &InstanceKey) -> Result<ReconcileOutcome> {
        self.a.reconcile_instance(key).await
    }

    pub async fn reconcile_b(&self, key: &InstanceKey) -> ReconcileOutcome {
        self.b.reconcile_instance(key).await.unwrap()
    }

    pub async fn a_record(&self, key: &InstanceKey) -> ManagedInstance<ASpec> {
        self.a_store.get(key).await.unwrap().expect("A record present")
    }

    pub async fn b_record(&self, key: &InstanceKey) -> ManagedInstance<BSpec> {
        self.b_store.get(key).await.unwrap().expect("B record present")
    }
}

async fn create<S: ResourceSpec>(
    store: &InMemoryInstanceStore<S>,
    name: &str,
    permissions: Option<&str>,
    spec: S,
) -> InstanceKey {
    let mut metadata = ObjectMeta::new(NAMESPACE, name);
    if let Some(value) = permissions {
        metadata = metadata.with_annotation(permission_annotation_key(DEFAULT_ANNOTATION_BASE), value);
    }
    store
        .create(ManagedInstance::new(metadata, spec))
        .await
        .unwrap()
        .key()
}
