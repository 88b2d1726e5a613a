pub mod bss;
pub mod cfs;
pub mod error;
pub mod hsm;
pub mod http;
pub mod ims;
pub mod objstore;
pub mod pcs;
pub mod stub;
pub mod tapms;

use std::sync::Arc;

pub use bss::{BootScript, HttpBootScript};
pub use cfs::{CfsState, ConfigFramework, ConfigOutcome, HttpConfigFramework};
pub use error::ClientError;
pub use hsm::{HardwareState, HttpHardwareState, NodeSummary};
pub use http::{batches, CallPolicy, ServiceClient, MAX_IDS_PER_CALL};
pub use ims::{image_id_from_path, HttpImageService, Image, ImageService};
pub use objstore::{HttpObjectStore, ObjectStore};
pub use pcs::{HttpPowerControl, PowerControl, PowerState, TransitionKind, TransitionOutcome};
pub use stub::StubClients;
pub use tapms::{HttpTenantService, TenantService};

/// Base URLs of every external collaborator.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub pcs: String,
    pub hsm: String,
    pub bss: String,
    pub ims: String,
    pub cfs: String,
    pub s3_gateway: String,
    pub tapms: String,
}

/// The full set of external-service clients handed to every operator.
#[derive(Clone)]
pub struct Clients {
    pub power: Arc<dyn PowerControl>,
    pub hardware: Arc<dyn HardwareState>,
    pub boot_script: Arc<dyn BootScript>,
    pub images: Arc<dyn ImageService>,
    pub objects: Arc<dyn ObjectStore>,
    pub config: Arc<dyn ConfigFramework>,
    pub tenants: Arc<dyn TenantService>,
}

impl Clients {
    pub fn http(endpoints: &Endpoints, bearer: Option<String>) -> Self {
        Self {
            power: Arc::new(HttpPowerControl::new(&endpoints.pcs, bearer.clone())),
            hardware: Arc::new(HttpHardwareState::new(&endpoints.hsm, bearer.clone())),
            boot_script: Arc::new(HttpBootScript::new(&endpoints.bss, bearer.clone())),
            images: Arc::new(HttpImageService::new(&endpoints.ims, bearer.clone())),
            objects: Arc::new(HttpObjectStore::new(&endpoints.s3_gateway)),
            config: Arc::new(HttpConfigFramework::new(&endpoints.cfs, bearer.clone())),
            tenants: Arc::new(HttpTenantService::new(&endpoints.tapms, bearer)),
        }
    }

    /// Every client backed by one shared [`StubClients`] fake.
    pub fn stub(stub: &StubClients) -> Self {
        Self {
            power: Arc::new(stub.clone()),
            hardware: Arc::new(stub.clone()),
            boot_script: Arc::new(stub.clone()),
            images: Arc::new(stub.clone()),
            objects: Arc::new(stub.clone()),
            config: Arc::new(stub.clone()),
            tenants: Arc::new(stub.clone()),
        }
    }
}
