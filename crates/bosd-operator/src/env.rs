use std::path::PathBuf;
use std::sync::Arc;

use bosd_client::Clients;
use bosd_store::StateStore;

use crate::options::OptionsProvider;

/// Everything an operator needs, injected at construction. Operators share
/// no in-memory state with each other; the store is their only common
/// medium.
#[derive(Clone)]
pub struct Env {
    pub store: Arc<dyn StateStore>,
    pub clients: Clients,
    pub options: OptionsProvider,
    /// Directory of per-operator liveness files, touched once per
    /// iteration. `None` disables the probe (tests).
    pub liveness_dir: Option<PathBuf>,
}

impl Env {
    pub fn new(
        store: Arc<dyn StateStore>,
        clients: Clients,
        liveness_dir: Option<PathBuf>,
    ) -> Self {
        let options = OptionsProvider::new(store.clone());
        Self {
            store,
            clients,
            options,
            liveness_dir,
        }
    }
}
